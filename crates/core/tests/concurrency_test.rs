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

//! Integration tests for maintenance running alongside group operations

mod common;

use std::{
	sync::{Arc, Mutex},
	time::Duration,
};

use async_trait::async_trait;
use common::{GROUP_ID, Harness};
use rewind_core::{
	CleanupAuthorization, DataFile, DatabaseState, EngineError, EngineGateway, MemoryEngine,
	MetadataStore, RollbackOutcome, SparseFile,
};
use rewind_sdk::{EngineSnapshotObject, OperationType};
use tokio::sync::Notify;

/// Holds the next snapshot creation for one database until released
#[derive(Default)]
struct CreateGate {
	armed: Mutex<Option<String>>,
	entered: Notify,
	release: Notify,
}

impl CreateGate {
	fn arm(&self, database: &str) {
		*self.armed.lock().unwrap() = Some(database.to_string());
	}

	fn take_if(&self, database: &str) -> bool {
		let mut armed = self.armed.lock().unwrap();
		if armed.as_deref() == Some(database) {
			*armed = None;
			true
		} else {
			false
		}
	}
}

struct GatedEngine {
	inner: Arc<MemoryEngine>,
	gate: Arc<CreateGate>,
}

#[async_trait]
impl EngineGateway for GatedEngine {
	async fn list_snapshot_objects(&self) -> Result<Vec<EngineSnapshotObject>, EngineError> {
		self.inner.list_snapshot_objects().await
	}

	async fn snapshot_exists(&self, name: &str) -> Result<bool, EngineError> {
		self.inner.snapshot_exists(name).await
	}

	async fn list_data_files(&self, database: &str) -> Result<Vec<DataFile>, EngineError> {
		self.inner.list_data_files(database).await
	}

	async fn database_state(&self, database: &str) -> Result<DatabaseState, EngineError> {
		self.inner.database_state(database).await
	}

	async fn create_snapshot_database(
		&self,
		source: &str,
		snapshot_name: &str,
		files: &[SparseFile],
	) -> Result<(), EngineError> {
		if self.gate.take_if(source) {
			self.gate.entered.notify_one();
			self.gate.release.notified().await;
		}
		self.inner
			.create_snapshot_database(source, snapshot_name, files)
			.await
	}

	async fn drop_database(&self, name: &str) -> Result<(), EngineError> {
		self.inner.drop_database(name).await
	}

	async fn restore_from_snapshot(
		&self,
		database: &str,
		snapshot_name: &str,
	) -> Result<(), EngineError> {
		self.inner.restore_from_snapshot(database, snapshot_name).await
	}

	async fn restore_with_recovery(&self, database: &str) -> Result<(), EngineError> {
		self.inner.restore_with_recovery(database).await
	}

	async fn set_single_user(&self, database: &str) -> Result<(), EngineError> {
		self.inner.set_single_user(database).await
	}

	async fn set_multi_user(&self, database: &str) -> Result<(), EngineError> {
		self.inner.set_multi_user(database).await
	}

	async fn terminate_sessions(&self, database: &str) -> Result<u32, EngineError> {
		self.inner.terminate_sessions(database).await
	}

	fn removal_command(&self, name: &str) -> String {
		self.inner.removal_command(name)
	}
}

fn gated_billing() -> (Harness, Arc<CreateGate>) {
	let gate = Arc::new(CreateGate::default());
	let h = Harness::with_gateway(&["orders", "ledger"], |inner| {
		Arc::new(GatedEngine {
			inner,
			gate: gate.clone(),
		}) as Arc<dyn EngineGateway>
	});
	(h, gate)
}

#[tokio::test]
async fn test_verify_waits_for_rollback() {
	let (h, gate) = gated_billing();
	let first = h.checkpoint("first").await;
	h.engine.set_data("orders", "v2");
	h.engine.set_data("ledger", "v2");

	// Rollback pauses in its automatic checkpoint, after the target
	// objects are gone but before the target record is purged.
	gate.arm("orders");
	let (outcome, report) = tokio::join!(h.service.rollback(&first), async {
		gate.entered.notified().await;
		let (report, ()) = tokio::join!(h.service.verify(), async {
			tokio::time::sleep(Duration::from_millis(20)).await;
			gate.release.notify_one();
		});
		report
	});

	let RollbackOutcome::Done {
		purged_snapshots, ..
	} = outcome.unwrap()
	else {
		panic!("expected done");
	};
	assert_eq!(purged_snapshots, vec![first]);
	assert_eq!(h.engine.data("orders").as_deref(), Some("v1"));
	assert_eq!(h.engine.data("ledger").as_deref(), Some("v1"));

	let report = report.unwrap();
	assert!(report.healed_snapshots.is_empty());
	assert!(report.missing_in_engine.is_empty());

	let records = h.store.snapshots_for_group(GROUP_ID).unwrap();
	assert_eq!(records.len(), 1);
	assert!(records[0].is_automatic);
	assert!(
		!h.store
			.history()
			.unwrap()
			.iter()
			.any(|e| e.operation == OperationType::HealStaleMetadata)
	);
	assert!(h.service.verify().await.unwrap().verified);
}

#[tokio::test]
async fn test_sweep_spares_checkpoint_in_flight() {
	let (h, gate) = gated_billing();
	let first = h.checkpoint("first").await;

	// Pause between the two databases of the automatic checkpoint: its
	// orders object exists, its record does not yet.
	gate.arm("ledger");
	let (outcome, sweep) = tokio::join!(h.service.rollback(&first), async {
		gate.entered.notified().await;
		let (sweep, ()) = tokio::join!(
			h.service.cleanup_orphaned(&CleanupAuthorization::All),
			async {
				tokio::time::sleep(Duration::from_millis(20)).await;
				gate.release.notify_one();
			}
		);
		sweep
	});

	assert!(matches!(outcome.unwrap(), RollbackOutcome::Done { .. }));
	let sweep = sweep.unwrap();
	assert!(sweep.dropped.is_empty());
	assert!(sweep.failed.is_empty());

	let records = h.store.snapshots_for_group(GROUP_ID).unwrap();
	assert_eq!(records.len(), 1);
	let mut expected: Vec<String> = records[0]
		.engine_object_names()
		.map(str::to_string)
		.collect();
	expected.sort();
	let mut remaining = h.engine.snapshot_names();
	remaining.sort();
	assert_eq!(remaining, expected);
	assert!(h.service.verify().await.unwrap().verified);
}
