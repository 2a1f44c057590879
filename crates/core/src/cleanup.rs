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

//! Removal of engine objects that metadata no longer accounts for

use std::{collections::HashSet, sync::Arc};

use rewind_sdk::{ConsistencyReport, OperationResult, OperationType};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
	audit::record_history,
	clock::Clock,
	engine::EngineGateway,
	error::{Result, ValidationError},
	identity::recognize_object_name,
	lock::GroupLocks,
	metadata::MetadataStore,
	reconcile::{ConsistencyReconciler, known_object_names},
};

/// Which orphaned objects an operator allows a sweep to drop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupAuthorization {
	All,
	Names(Vec<String>),
}

impl CleanupAuthorization {
	fn allows(&self, name: &str) -> bool {
		match self {
			Self::All => true,
			Self::Names(names) => names.iter().any(|n| n == name),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
	pub name: String,
	pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
	pub dropped: Vec<String>,
	pub failed: Vec<CleanupFailure>,
	/// Orphans left alone because they were not authorized or recognized
	pub skipped: Vec<String>,
	/// The consistency check the sweep was based on
	pub report: ConsistencyReport,
}

impl CleanupReport {
	pub fn dropped_count(&self) -> usize {
		self.dropped.len()
	}
}

/// Result of removing a snapshot with failed databases
#[derive(Debug, Clone, Serialize)]
pub struct InvalidCleanupReport {
	pub snapshot_id: String,
	pub dropped: Vec<String>,
	pub failed: Vec<CleanupFailure>,
}

pub struct OrphanCleanupService {
	engine: Arc<dyn EngineGateway>,
	store: Arc<dyn MetadataStore>,
	clock: Arc<dyn Clock>,
	locks: Arc<GroupLocks>,
	reconciler: ConsistencyReconciler,
}

impl OrphanCleanupService {
	pub fn new(
		engine: Arc<dyn EngineGateway>,
		store: Arc<dyn MetadataStore>,
		clock: Arc<dyn Clock>,
		locks: Arc<GroupLocks>,
	) -> Self {
		let reconciler = ConsistencyReconciler::new(
			engine.clone(),
			store.clone(),
			clock.clone(),
			locks.clone(),
		);
		Self {
			engine,
			store,
			clock,
			locks,
			reconciler,
		}
	}

	/// Drop the orphaned engine objects the operator authorized
	pub async fn sweep(&self, authorization: &CleanupAuthorization) -> Result<CleanupReport> {
		let report = self.reconciler.verify().await?;
		let (selected, skipped): (Vec<String>, Vec<String>) = report
			.orphaned_in_engine
			.iter()
			.cloned()
			.partition(|name| authorization.allows(name));

		self.drop_all(selected, skipped, report, "operator").await
	}

	/// Drop every orphan that follows this crate's naming scheme
	///
	/// Runs once at process start, when no operation can still be using
	/// such a remnant. Anything else in the engine is left untouched.
	pub async fn startup_sweep(&self) -> Result<CleanupReport> {
		let report = self.reconciler.verify().await?;
		let groups = self.store.get_all_groups()?;
		let (selected, skipped): (Vec<String>, Vec<String>) = report
			.orphaned_in_engine
			.iter()
			.cloned()
			.partition(|name| recognize_object_name(name, &groups).is_some());

		self.drop_all(selected, skipped, report, "startup").await
	}

	async fn drop_all(
		&self,
		selected: Vec<String>,
		skipped: Vec<String>,
		report: ConsistencyReport,
		trigger: &str,
	) -> Result<CleanupReport> {
		let mut cleanup = CleanupReport {
			skipped,
			report,
			..Default::default()
		};

		let groups = self.store.get_all_groups()?;
		for name in selected {
			// An object of ours may belong to a create or rollback still in
			// flight; its record only lands once that operation is done.
			let _guard = match recognize_object_name(&name, &groups) {
				Some(recognized) => Some(self.locks.acquire(&recognized.group.id).await),
				None => None,
			};
			if known_object_names(&self.store.get_all_snapshots()?).contains(&name) {
				debug!(target: "cleanup", object = %name, "Object gained a record; not an orphan");
				cleanup.skipped.push(name);
				continue;
			}

			match self.engine.drop_database(&name).await {
				Ok(()) => cleanup.dropped.push(name),
				Err(e) => {
					warn!(target: "cleanup", object = %name, error = %e, "Failed to drop orphaned object");
					cleanup.failed.push(CleanupFailure {
						name,
						error: e.to_string(),
					});
				}
			}
		}

		if !cleanup.dropped.is_empty() || !cleanup.failed.is_empty() {
			record_history(
				self.store.as_ref(),
				self.clock.as_ref(),
				OperationType::CleanupOrphans,
				serde_json::json!({
					"trigger": trigger,
					"dropped": cleanup.dropped,
					"skipped": cleanup.skipped,
				}),
				cleanup
					.dropped
					.iter()
					.map(|name| OperationResult {
						database: name.clone(),
						success: true,
						error: None,
					})
					.chain(cleanup.failed.iter().map(|f| OperationResult {
						database: f.name.clone(),
						success: false,
						error: Some(f.error.clone()),
					}))
					.collect(),
			);
		}

		info!(
			target: "cleanup",
			trigger,
			dropped = cleanup.dropped.len(),
			failed = cleanup.failed.len(),
			skipped = cleanup.skipped.len(),
			"Orphan sweep finished"
		);

		Ok(cleanup)
	}

	/// Remove a snapshot that failed for at least one database, together
	/// with the engine objects it did manage to create
	pub async fn cleanup_invalid(&self, snapshot_id: &str) -> Result<InvalidCleanupReport> {
		let snapshot = self
			.store
			.get_snapshot(snapshot_id)?
			.ok_or_else(|| ValidationError::SnapshotNotFound(snapshot_id.to_string()))?;
		if snapshot.is_complete() {
			return Err(ValidationError::SnapshotNotInvalid(snapshot.id).into());
		}

		let existing: HashSet<String> = self
			.engine
			.list_snapshot_objects()
			.await?
			.into_iter()
			.map(|o| o.name)
			.collect();

		let mut cleanup = InvalidCleanupReport {
			snapshot_id: snapshot.id.clone(),
			dropped: Vec::new(),
			failed: Vec::new(),
		};
		for name in snapshot
			.engine_object_names()
			.filter(|name| existing.contains(*name))
		{
			match self.engine.drop_database(name).await {
				Ok(()) => cleanup.dropped.push(name.to_string()),
				Err(e) => cleanup.failed.push(CleanupFailure {
					name: name.to_string(),
					error: e.to_string(),
				}),
			}
		}

		// Objects that failed to drop show up as orphans on the next verify.
		self.store.delete_snapshot(&snapshot.id)?;

		record_history(
			self.store.as_ref(),
			self.clock.as_ref(),
			OperationType::CleanupInvalid,
			serde_json::json!({
				"group_id": snapshot.group_id,
				"snapshot_id": snapshot.id,
				"display_name": snapshot.display_name,
			}),
			snapshot
				.database_snapshots
				.iter()
				.map(OperationResult::from)
				.collect(),
		);

		info!(
			target: "cleanup",
			snapshot_id = %snapshot.id,
			dropped = cleanup.dropped.len(),
			failed = cleanup.failed.len(),
			"Invalid snapshot removed"
		);

		Ok(cleanup)
	}
}
