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

//! Operation facade used by the operator binary and any outer surface

use std::sync::Arc;

use rewind_sdk::{ConsistencyReport, OperationResult, OperationType, Snapshot};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
	audit::record_history,
	cleanup::{CleanupAuthorization, CleanupFailure, CleanupReport, InvalidCleanupReport, OrphanCleanupService},
	clock::Clock,
	config::SnapshotSettings,
	creator::{CreationOutcome, SnapshotCreator},
	engine::EngineGateway,
	error::{Result, ValidationError},
	lock::GroupLocks,
	metadata::MetadataStore,
	reconcile::ConsistencyReconciler,
	rollback::{PreCheckReport, RollbackOrchestrator, RollbackOutcome},
};

#[derive(Debug, Clone, Serialize)]
pub struct DeletionReport {
	pub snapshot_id: String,
	pub dropped: Vec<String>,
	/// Drops that failed; the object may already have been gone
	pub failed: Vec<CleanupFailure>,
}

/// Snapshot service
///
/// Wires the lifecycle components to one engine gateway and one metadata
/// store, and serializes mutating operations per group.
pub struct SnapshotService {
	engine: Arc<dyn EngineGateway>,
	store: Arc<dyn MetadataStore>,
	clock: Arc<dyn Clock>,
	creator: SnapshotCreator,
	reconciler: ConsistencyReconciler,
	rollback: RollbackOrchestrator,
	cleanup: OrphanCleanupService,
	locks: Arc<GroupLocks>,
}

impl SnapshotService {
	pub fn new(
		engine: Arc<dyn EngineGateway>,
		store: Arc<dyn MetadataStore>,
		clock: Arc<dyn Clock>,
		settings: SnapshotSettings,
	) -> Self {
		// One set of locks for every component that touches group state
		let locks = Arc::new(GroupLocks::new());
		Self {
			creator: SnapshotCreator::new(
				engine.clone(),
				store.clone(),
				clock.clone(),
				settings.clone(),
			),
			reconciler: ConsistencyReconciler::new(
				engine.clone(),
				store.clone(),
				clock.clone(),
				locks.clone(),
			),
			rollback: RollbackOrchestrator::new(
				engine.clone(),
				store.clone(),
				clock.clone(),
				settings,
			),
			cleanup: OrphanCleanupService::new(
				engine.clone(),
				store.clone(),
				clock.clone(),
				locks.clone(),
			),
			locks,
			engine,
			store,
			clock,
		}
	}

	pub fn locks(&self) -> &GroupLocks {
		self.locks.as_ref()
	}

	fn snapshot(&self, snapshot_id: &str) -> Result<Snapshot> {
		Ok(self
			.store
			.get_snapshot(snapshot_id)?
			.ok_or_else(|| ValidationError::SnapshotNotFound(snapshot_id.to_string()))?)
	}

	pub async fn create_snapshot(
		&self,
		group_id: &str,
		display_name: Option<&str>,
	) -> Result<CreationOutcome> {
		let _guard = self.locks.acquire(group_id).await;
		self.creator.create(group_id, display_name).await
	}

	/// Snapshots of a group, newest first
	pub fn list_snapshots(&self, group_id: &str) -> Result<Vec<Snapshot>> {
		if self.store.get_group(group_id)?.is_none() {
			return Err(ValidationError::GroupNotFound(group_id.to_string()).into());
		}
		Ok(self.store.snapshots_for_group(group_id)?)
	}

	pub async fn delete_snapshot(&self, snapshot_id: &str) -> Result<DeletionReport> {
		let group_id = self.snapshot(snapshot_id)?.group_id;
		let _guard = self.locks.acquire(&group_id).await;
		// Re-read under the lock; a rollback may have purged it meanwhile.
		let snapshot = self.snapshot(snapshot_id)?;

		let mut report = DeletionReport {
			snapshot_id: snapshot.id.clone(),
			dropped: Vec::new(),
			failed: Vec::new(),
		};
		for name in snapshot.engine_object_names() {
			match self.engine.drop_database(name).await {
				Ok(()) => report.dropped.push(name.to_string()),
				Err(e) => {
					warn!(target: "service", object = name, error = %e, "Failed to drop snapshot object");
					report.failed.push(CleanupFailure {
						name: name.to_string(),
						error: e.to_string(),
					});
				}
			}
		}

		self.store.delete_snapshot(&snapshot.id)?;
		record_history(
			self.store.as_ref(),
			self.clock.as_ref(),
			OperationType::DeleteSnapshot,
			serde_json::json!({
				"group_id": snapshot.group_id,
				"snapshot_id": snapshot.id,
				"display_name": snapshot.display_name,
			}),
			report
				.dropped
				.iter()
				.map(|name| OperationResult {
					database: name.clone(),
					success: true,
					error: None,
				})
				.chain(report.failed.iter().map(|f| OperationResult {
					database: f.name.clone(),
					success: false,
					error: Some(f.error.clone()),
				}))
				.collect(),
		);

		info!(target: "service", snapshot_id = %snapshot.id, dropped = report.dropped.len(), "Snapshot deleted");
		Ok(report)
	}

	pub async fn check_external(&self, snapshot_id: &str) -> Result<PreCheckReport> {
		self.rollback.pre_check(snapshot_id).await
	}

	pub async fn rollback(&self, snapshot_id: &str) -> Result<RollbackOutcome> {
		let group_id = self.snapshot(snapshot_id)?.group_id;
		let _guard = self.locks.acquire(&group_id).await;
		self.rollback.rollback(snapshot_id).await
	}

	pub async fn cleanup_invalid(&self, snapshot_id: &str) -> Result<InvalidCleanupReport> {
		let group_id = self.snapshot(snapshot_id)?.group_id;
		let _guard = self.locks.acquire(&group_id).await;
		self.cleanup.cleanup_invalid(snapshot_id).await
	}

	/// Stale records are removed under their group's lock, so this waits
	/// for a create, delete or rollback running on that group.
	pub async fn verify(&self) -> Result<ConsistencyReport> {
		self.reconciler.verify().await
	}

	pub async fn cleanup_orphaned(&self, authorization: &CleanupAuthorization) -> Result<CleanupReport> {
		self.cleanup.sweep(authorization).await
	}

	/// Remove records whose engine objects are gone; returns their ids
	pub async fn cleanup_stale_metadata(&self) -> Result<Vec<String>> {
		Ok(self.reconciler.verify().await?.healed_snapshots)
	}

	pub async fn startup_sweep(&self) -> Result<CleanupReport> {
		self.cleanup.startup_sweep().await
	}
}
