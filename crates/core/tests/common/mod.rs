// Copyright 2025 itscheems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shared fixtures for the lifecycle integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rewind_core::{
	EngineGateway, FixedClock, MemoryEngine, MemoryMetadataStore, MetadataStore, SnapshotService,
	SnapshotSettings,
};
use rewind_sdk::DatabaseGroup;

pub const GROUP_ID: &str = "g-billing";

pub struct Harness {
	pub engine: Arc<MemoryEngine>,
	pub store: Arc<MemoryMetadataStore>,
	pub clock: Arc<FixedClock>,
	pub service: SnapshotService,
}

impl Harness {
	/// Group `billing` over `orders` and `ledger`, both holding "v1"
	pub fn billing() -> Self {
		Self::with_databases(&["orders", "ledger"])
	}

	pub fn with_databases(databases: &[&str]) -> Self {
		Self::with_gateway(databases, |engine| engine as Arc<dyn EngineGateway>)
	}

	/// Like [`Harness::with_databases`], with the service talking to the
	/// engine through `wrap`
	pub fn with_gateway(
		databases: &[&str],
		wrap: impl FnOnce(Arc<MemoryEngine>) -> Arc<dyn EngineGateway>,
	) -> Self {
		let engine = Arc::new(MemoryEngine::new());
		for db in databases {
			engine.add_database(db, "v1");
		}

		let store = Arc::new(MemoryMetadataStore::new());
		store
			.add_group(DatabaseGroup::new(
				GROUP_ID,
				"billing",
				databases.iter().map(|d| d.to_string()).collect(),
			))
			.unwrap();

		let clock = Arc::new(FixedClock::new(
			Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap(),
		));
		let settings = SnapshotSettings {
			snapshot_base_path: "/var/opt/mssql/snapshots".to_string(),
			..SnapshotSettings::default()
		};

		let service = SnapshotService::new(wrap(engine.clone()), store.clone(), clock.clone(), settings);

		Self {
			engine,
			store,
			clock,
			service,
		}
	}

	/// Create a snapshot and move the clock so the next id differs
	pub async fn checkpoint(&self, label: &str) -> String {
		let outcome = self
			.service
			.create_snapshot(GROUP_ID, Some(label))
			.await
			.unwrap();
		self.clock.advance(chrono::Duration::seconds(1));
		outcome.snapshot.id
	}

	pub fn snapshot_count(&self) -> usize {
		self.store.snapshots_for_group(GROUP_ID).unwrap().len()
	}
}
