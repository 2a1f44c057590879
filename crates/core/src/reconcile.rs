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

//! Metadata/engine drift detection and self-healing

use std::{
	collections::{BTreeMap, BTreeSet, HashSet},
	sync::Arc,
};

use rewind_sdk::{ConsistencyReport, OperationResult, OperationType, Snapshot};
use tracing::{debug, info, warn};

use crate::{
	audit::record_history, clock::Clock, engine::EngineGateway, error::Result, lock::GroupLocks,
	metadata::MetadataStore,
};

/// Every engine object name referenced by metadata, failed entries included
pub fn known_object_names(snapshots: &[Snapshot]) -> HashSet<String> {
	snapshots
		.iter()
		.flat_map(|s| s.database_snapshots.iter())
		.map(|entry| entry.snapshot_name.clone())
		.collect()
}

/// Compares the engine catalog with the metadata store
///
/// Orphaned engine objects are only reported. Records that reference a
/// vanished engine object can never back a rollback again and are removed
/// on the spot, under the owning group's lock.
pub struct ConsistencyReconciler {
	engine: Arc<dyn EngineGateway>,
	store: Arc<dyn MetadataStore>,
	clock: Arc<dyn Clock>,
	locks: Arc<GroupLocks>,
}

/// Record found stale on a re-check under its group lock
struct StaleSnapshot {
	snapshot: Snapshot,
	missing: Vec<String>,
	surviving: Vec<String>,
}

impl ConsistencyReconciler {
	pub fn new(
		engine: Arc<dyn EngineGateway>,
		store: Arc<dyn MetadataStore>,
		clock: Arc<dyn Clock>,
		locks: Arc<GroupLocks>,
	) -> Self {
		Self {
			engine,
			store,
			clock,
			locks,
		}
	}

	pub async fn verify(&self) -> Result<ConsistencyReport> {
		let in_engine = self.engine_object_names().await?;

		let snapshots = self.store.get_all_snapshots()?;
		// successful engine object name -> owning snapshot id
		let mut in_metadata: BTreeMap<String, String> = BTreeMap::new();
		for snapshot in &snapshots {
			for name in snapshot.engine_object_names() {
				in_metadata.insert(name.to_string(), snapshot.id.clone());
			}
		}

		let orphaned: Vec<String> = in_engine
			.iter()
			.filter(|name| !in_metadata.contains_key(*name))
			.cloned()
			.collect();
		let missing: Vec<(String, String)> = in_metadata
			.iter()
			.filter(|(name, _)| !in_engine.contains(*name))
			.map(|(name, id)| (name.clone(), id.clone()))
			.collect();

		let mut report = ConsistencyReport {
			verified: orphaned.is_empty() && missing.is_empty(),
			orphaned_in_engine: orphaned,
			..Default::default()
		};

		if !report.orphaned_in_engine.is_empty() {
			report.issues.push(format!(
				"{} engine snapshot object(s) unknown to metadata",
				report.orphaned_in_engine.len()
			));
		}

		if !missing.is_empty() {
			self.heal(&snapshots, missing, &mut report).await;
		}

		info!(
			target: "reconciler",
			verified = report.verified,
			orphaned = report.orphaned_in_engine.len(),
			healed = report.healed_snapshots.len(),
			"Consistency check finished"
		);

		Ok(report)
	}

	async fn engine_object_names(&self) -> Result<BTreeSet<String>> {
		Ok(self
			.engine
			.list_snapshot_objects()
			.await?
			.into_iter()
			.map(|o| o.name)
			.collect())
	}

	/// Re-read `snapshot_id` and the engine catalog; `None` when the record
	/// is gone or complete again
	async fn recheck(&self, snapshot_id: &str) -> Result<Option<StaleSnapshot>> {
		let Some(snapshot) = self.store.get_snapshot(snapshot_id)? else {
			return Ok(None);
		};
		let in_engine = self.engine_object_names().await?;
		let (surviving, missing): (Vec<String>, Vec<String>) = snapshot
			.engine_object_names()
			.map(str::to_string)
			.partition(|name| in_engine.contains(name));
		if missing.is_empty() {
			return Ok(None);
		}
		Ok(Some(StaleSnapshot {
			snapshot,
			missing,
			surviving,
		}))
	}

	async fn heal(
		&self,
		snapshots: &[Snapshot],
		missing: Vec<(String, String)>,
		report: &mut ConsistencyReport,
	) {
		let mut by_snapshot: BTreeMap<String, Vec<String>> = BTreeMap::new();
		for (name, id) in missing {
			by_snapshot.entry(id).or_default().push(name);
		}

		let mut results = Vec::new();
		for (snapshot_id, first_seen) in by_snapshot {
			let Some(group_id) = snapshots
				.iter()
				.find(|s| s.id == snapshot_id)
				.map(|s| s.group_id.clone())
			else {
				continue;
			};

			// Create, rollback and delete move objects around under this lock;
			// what looked stale a moment ago may be mid-operation.
			let _guard = self.locks.acquire(&group_id).await;
			let stale = match self.recheck(&snapshot_id).await {
				Ok(Some(stale)) => stale,
				Ok(None) => {
					debug!(target: "reconciler", snapshot_id = %snapshot_id, "Snapshot no longer stale");
					continue;
				}
				Err(e) => {
					warn!(target: "reconciler", snapshot_id = %snapshot_id, error = %e, "Re-check failed");
					report.issues.push(format!(
						"Snapshot {} references missing engine object(s) but could not be re-checked: {}",
						snapshot_id, e
					));
					report.missing_in_engine.extend(first_seen);
					continue;
				}
			};
			let snapshot = &stale.snapshot;

			// A checkpoint missing one database cannot restore the group as a
			// whole, so the surviving siblings go with the record.
			for sibling in &stale.surviving {
				if let Err(e) = self.engine.drop_database(sibling).await {
					warn!(
						target: "reconciler",
						snapshot_id = %snapshot_id,
						object = %sibling,
						error = %e,
						"Failed to drop surviving engine object of stale snapshot"
					);
				}
			}

			match self.store.delete_snapshot(&snapshot_id) {
				Ok(_) => {
					warn!(
						target: "reconciler",
						snapshot_id = %snapshot_id,
						missing = ?stale.missing,
						"Removed stale snapshot record"
					);
					report.issues.push(format!(
						"Removed snapshot {} ({}): engine object(s) missing: {}",
						snapshot_id,
						snapshot.display_name,
						stale.missing.join(", ")
					));
					results.push(OperationResult {
						database: snapshot.group_id.clone(),
						success: true,
						error: None,
					});
					report.healed_snapshots.push(snapshot_id);
				}
				Err(e) => {
					warn!(
						target: "reconciler",
						snapshot_id = %snapshot_id,
						error = %e,
						"Failed to remove stale snapshot record"
					);
					report.issues.push(format!(
						"Snapshot {} references missing engine object(s) but could not be removed: {}",
						snapshot_id, e
					));
					results.push(OperationResult {
						database: snapshot.group_id.clone(),
						success: false,
						error: Some(e.to_string()),
					});
					report.missing_in_engine.extend(stale.missing);
				}
			}
		}

		if !results.is_empty() {
			record_history(
				self.store.as_ref(),
				self.clock.as_ref(),
				OperationType::HealStaleMetadata,
				serde_json::json!({ "removed_snapshots": report.healed_snapshots }),
				results,
			);
		}
	}
}
