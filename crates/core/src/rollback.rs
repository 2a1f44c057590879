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

//! Group rollback to a checkpoint
//!
//! A rollback walks through fixed stages:
//! 1. Pre-check: refuse when the engine holds snapshot objects of a target
//!    database that metadata knows nothing about
//! 2. Evict the group's other snapshot objects on the target databases
//! 3. Restore each database from its snapshot object
//! 4. Drop any leftover snapshot objects of the group
//! 5. Capture an automatic checkpoint of the restored state
//! 6. Replace the group's snapshot records with that checkpoint
//!
//! Any restore failure in stage 3 stops the rollback there.

use std::{collections::HashSet, fmt, sync::Arc};

use rewind_sdk::{OperationResult, OperationType, Snapshot};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
	audit::record_history,
	clock::Clock,
	config::SnapshotSettings,
	creator::SnapshotCreator,
	engine::EngineGateway,
	error::{DatabaseFailure, Error, Result, ValidationError},
	identity,
	metadata::MetadataStore,
	reconcile::known_object_names,
};

/// An engine snapshot object nobody in metadata owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSnapshot {
	pub name: String,
	pub source_database: String,
	/// Statement an operator can run to remove it
	pub removal_command: String,
}

/// Snapshot objects found on the target databases of a rollback
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreCheckReport {
	pub snapshot_id: String,
	/// Objects belonging to the target snapshot
	pub target_objects: Vec<String>,
	/// Objects of other checkpoints known to metadata
	pub known_objects: Vec<String>,
	/// Objects that block the rollback
	pub external: Vec<ExternalSnapshot>,
	/// Target snapshot objects that are no longer in the engine
	pub missing_targets: Vec<String>,
}

impl PreCheckReport {
	pub fn is_blocked(&self) -> bool {
		!self.external.is_empty()
	}
}

/// Per-database restore result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreResult {
	pub database: String,
	pub snapshot_name: String,
	pub success: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	/// Non-fatal problems hit while preparing or finishing the restore
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub warnings: Vec<String>,
}

impl From<&RestoreResult> for OperationResult {
	fn from(r: &RestoreResult) -> Self {
		Self {
			database: r.database.clone(),
			success: r.success,
			error: r.error.clone(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackStage {
	PreCheck,
	EvictGroupSnapshots,
	PerDatabaseRestore,
	PostRestoreCleanup,
	CheckpointCreate,
	MetadataPurgeAndRewrite,
}

impl fmt::Display for RollbackStage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Self::PreCheck => "pre_check",
			Self::EvictGroupSnapshots => "evict_group_snapshots",
			Self::PerDatabaseRestore => "per_database_restore",
			Self::PostRestoreCleanup => "post_restore_cleanup",
			Self::CheckpointCreate => "checkpoint_create",
			Self::MetadataPurgeAndRewrite => "metadata_purge_and_rewrite",
		};
		f.write_str(name)
	}
}

/// What happened to the automatic checkpoint after a successful restore
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckpointStatus {
	Created {
		snapshot: Snapshot,
		failures: Vec<DatabaseFailure>,
	},
	Failed {
		error: String,
	},
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackOutcome {
	/// Every database was restored
	Done {
		snapshot_id: String,
		group_id: String,
		results: Vec<RestoreResult>,
		checkpoint: CheckpointStatus,
		/// Snapshot records replaced by the checkpoint
		purged_snapshots: Vec<String>,
		#[serde(skip_serializing_if = "Vec::is_empty")]
		warnings: Vec<String>,
	},
	/// External snapshot objects prevent the restore; nothing was changed
	Blocked {
		snapshot_id: String,
		external: Vec<ExternalSnapshot>,
	},
	/// At least one database failed to restore; the group is partially
	/// rolled back and needs operator attention
	Failed {
		snapshot_id: String,
		group_id: String,
		results: Vec<RestoreResult>,
	},
}

impl RollbackOutcome {
	pub fn is_done(&self) -> bool {
		matches!(self, Self::Done { .. })
	}

	/// Map the non-done outcomes onto the error taxonomy
	pub fn into_result(self) -> Result<Self> {
		match self {
			Self::Blocked { external, .. } => Err(Error::Consistency(external)),
			Self::Failed {
				snapshot_id,
				results,
				..
			} => Err(Error::PartialFailure {
				operation: format!("rollback to {}", snapshot_id),
				failures: results
					.iter()
					.filter(|r| !r.success)
					.map(|r| DatabaseFailure::new(&r.database, r.error.clone().unwrap_or_default()))
					.collect(),
			}),
			done => Ok(done),
		}
	}
}

pub struct RollbackOrchestrator {
	engine: Arc<dyn EngineGateway>,
	store: Arc<dyn MetadataStore>,
	clock: Arc<dyn Clock>,
	creator: SnapshotCreator,
	checkpoint_label: String,
}

impl RollbackOrchestrator {
	pub fn new(
		engine: Arc<dyn EngineGateway>,
		store: Arc<dyn MetadataStore>,
		clock: Arc<dyn Clock>,
		settings: SnapshotSettings,
	) -> Self {
		let checkpoint_label = settings.automatic_checkpoint_label.clone();
		let creator = SnapshotCreator::new(engine.clone(), store.clone(), clock.clone(), settings);
		Self {
			engine,
			store,
			clock,
			creator,
			checkpoint_label,
		}
	}

	fn load_snapshot(&self, snapshot_id: &str) -> Result<Snapshot> {
		Ok(self
			.store
			.get_snapshot(snapshot_id)?
			.ok_or_else(|| ValidationError::SnapshotNotFound(snapshot_id.to_string()))?)
	}

	/// Classify every snapshot object on the databases of `snapshot_id`
	pub async fn pre_check(&self, snapshot_id: &str) -> Result<PreCheckReport> {
		let snapshot = self.load_snapshot(snapshot_id)?;
		self.pre_check_snapshot(&snapshot).await
	}

	async fn pre_check_snapshot(&self, snapshot: &Snapshot) -> Result<PreCheckReport> {
		let objects = self.engine.list_snapshot_objects().await?;
		let known = known_object_names(&self.store.get_all_snapshots()?);
		let targets: HashSet<&str> = snapshot.engine_object_names().collect();
		let databases: HashSet<&str> = snapshot
			.database_snapshots
			.iter()
			.map(|entry| entry.database.as_str())
			.collect();

		let mut report = PreCheckReport {
			snapshot_id: snapshot.id.clone(),
			..Default::default()
		};

		for object in objects
			.iter()
			.filter(|o| databases.contains(o.source_database.as_str()))
		{
			if targets.contains(object.name.as_str()) {
				report.target_objects.push(object.name.clone());
			} else if known.contains(&object.name) {
				report.known_objects.push(object.name.clone());
			} else {
				report.external.push(ExternalSnapshot {
					name: object.name.clone(),
					source_database: object.source_database.clone(),
					removal_command: self.engine.removal_command(&object.name),
				});
			}
		}

		report.missing_targets = targets
			.iter()
			.filter(|name| !objects.iter().any(|o| o.name == **name))
			.map(|name| name.to_string())
			.collect();
		report.missing_targets.sort();

		debug!(
			target: "rollback",
			snapshot_id = %snapshot.id,
			targets = report.target_objects.len(),
			known = report.known_objects.len(),
			external = report.external.len(),
			"Pre-check finished"
		);

		Ok(report)
	}

	/// Roll the group owning `snapshot_id` back to that checkpoint
	///
	/// Precondition violations and engine read failures before the first
	/// destructive step are errors. Everything after is reported through
	/// [`RollbackOutcome`].
	pub async fn rollback(&self, snapshot_id: &str) -> Result<RollbackOutcome> {
		let snapshot = self.load_snapshot(snapshot_id)?;
		if !snapshot.is_complete() {
			return Err(ValidationError::IncompleteSnapshot(snapshot.id.clone()).into());
		}
		let group = self
			.store
			.get_group(&snapshot.group_id)?
			.ok_or_else(|| ValidationError::GroupNotFound(snapshot.group_id.clone()))?;

		info!(
			target: "rollback",
			snapshot_id = %snapshot.id,
			group_id = %group.id,
			stage = %RollbackStage::PreCheck,
			"Starting rollback"
		);

		let pre_check = self.pre_check_snapshot(&snapshot).await?;
		if pre_check.is_blocked() {
			warn!(
				target: "rollback",
				snapshot_id = %snapshot.id,
				external = ?pre_check.external.iter().map(|e| &e.name).collect::<Vec<_>>(),
				"Rollback blocked by external snapshots"
			);
			self.record(&snapshot, "blocked", &[]);
			return Ok(RollbackOutcome::Blocked {
				snapshot_id: snapshot.id,
				external: pre_check.external,
			});
		}
		if !pre_check.missing_targets.is_empty() {
			return Err(ValidationError::SnapshotObjectsMissing {
				snapshot_id: snapshot.id.clone(),
				missing: pre_check.missing_targets,
			}
			.into());
		}

		let mut warnings = Vec::new();

		self.log_stage(&snapshot, RollbackStage::EvictGroupSnapshots);
		for name in &pre_check.known_objects {
			if let Err(e) = self.engine.drop_database(name).await {
				warn!(target: "rollback", object = %name, error = %e, "Failed to evict snapshot object");
				warnings.push(format!("evict {}: {}", name, e));
			}
		}

		self.log_stage(&snapshot, RollbackStage::PerDatabaseRestore);
		let mut results = Vec::with_capacity(snapshot.database_snapshots.len());
		for entry in &snapshot.database_snapshots {
			results.push(
				self.restore_database(&entry.database, &entry.snapshot_name)
					.await,
			);
		}

		if results.iter().any(|r| !r.success) {
			error!(
				target: "rollback",
				snapshot_id = %snapshot.id,
				group_id = %group.id,
				failed = ?results.iter().filter(|r| !r.success).map(|r| &r.database).collect::<Vec<_>>(),
				"Rollback aborted; group is partially restored"
			);
			self.record(&snapshot, "failed", &results);
			return Ok(RollbackOutcome::Failed {
				snapshot_id: snapshot.id,
				group_id: group.id,
				results,
			});
		}

		self.log_stage(&snapshot, RollbackStage::PostRestoreCleanup);
		self.post_restore_cleanup(&snapshot, &mut warnings).await;

		self.log_stage(&snapshot, RollbackStage::CheckpointCreate);
		let checkpoint = self
			.creator
			.capture(&group, self.checkpoint_label.clone(), 1, true)
			.await;
		let checkpoint = if checkpoint.succeeded_count() == 0 {
			let reason = checkpoint
				.failures()
				.map(|f| format!("{}: {}", f.database, f.error.as_deref().unwrap_or_default()))
				.collect::<Vec<_>>()
				.join("; ");
			warn!(
				target: "rollback",
				group_id = %group.id,
				error = %reason,
				"Automatic checkpoint failed for every database"
			);
			Err(reason)
		} else {
			Ok(checkpoint)
		};

		self.log_stage(&snapshot, RollbackStage::MetadataPurgeAndRewrite);
		let purged_snapshots = match self.store.delete_snapshots_for_group(&group.id) {
			Ok(ids) => ids,
			Err(e) => {
				warn!(target: "rollback", group_id = %group.id, error = %e, "Failed to purge snapshot records");
				warnings.push(format!("purge snapshot records: {}", e));
				Vec::new()
			}
		};

		let checkpoint = match checkpoint {
			Ok(created) => {
				if let Err(e) = self.store.add_snapshot(&created) {
					warn!(target: "rollback", snapshot_id = %created.id, error = %e, "Failed to record automatic checkpoint");
					warnings.push(format!("record checkpoint {}: {}", created.id, e));
				}
				record_history(
					self.store.as_ref(),
					self.clock.as_ref(),
					OperationType::AutomaticCheckpoint,
					serde_json::json!({
						"group_id": group.id,
						"snapshot_id": created.id,
						"after_rollback_to": snapshot.id,
					}),
					created
						.database_snapshots
						.iter()
						.map(OperationResult::from)
						.collect(),
				);
				CheckpointStatus::Created {
					failures: created
						.failures()
						.map(|f| DatabaseFailure::new(&f.database, f.error.clone().unwrap_or_default()))
						.collect(),
					snapshot: created,
				}
			}
			Err(error) => CheckpointStatus::Failed { error },
		};

		self.record(&snapshot, "done", &results);
		info!(
			target: "rollback",
			snapshot_id = %snapshot.id,
			group_id = %group.id,
			purged = purged_snapshots.len(),
			"Rollback completed"
		);

		Ok(RollbackOutcome::Done {
			snapshot_id: snapshot.id,
			group_id: group.id,
			results,
			checkpoint,
			purged_snapshots,
			warnings,
		})
	}

	async fn restore_database(&self, database: &str, snapshot_name: &str) -> RestoreResult {
		let mut result = RestoreResult {
			database: database.to_string(),
			snapshot_name: snapshot_name.to_string(),
			success: false,
			error: None,
			warnings: Vec::new(),
		};

		match self.engine.snapshot_exists(snapshot_name).await {
			Ok(true) => {}
			Ok(false) => {
				result.error = Some(format!("snapshot object {} no longer exists", snapshot_name));
				return result;
			}
			Err(e) => {
				result.error = Some(e.to_string());
				return result;
			}
		}

		match self.engine.terminate_sessions(database).await {
			Ok(killed) if killed > 0 => {
				debug!(target: "rollback", database, killed, "Terminated sessions");
			}
			Ok(_) => {}
			Err(e) => result.warnings.push(format!("terminate sessions: {}", e)),
		}

		if let Err(e) = self.engine.set_single_user(database).await {
			result.warnings.push(format!("set single user: {}", e));
		}

		match self.engine.database_state(database).await {
			Ok(state) if state.is_mid_restore() => {
				info!(target: "rollback", database, state = ?state, "Recovering interrupted restore");
				if let Err(e) = self.engine.restore_with_recovery(database).await {
					result.warnings.push(format!("restore with recovery: {}", e));
				}
			}
			Ok(_) => {}
			Err(e) => result.warnings.push(format!("read state: {}", e)),
		}

		match self.engine.restore_from_snapshot(database, snapshot_name).await {
			Ok(()) => result.success = true,
			Err(e) => {
				error!(target: "rollback", database, snapshot_name, error = %e, "Restore failed");
				result.error = Some(e.to_string());
			}
		}

		if let Err(e) = self.engine.set_multi_user(database).await {
			result.warnings.push(format!("set multi user: {}", e));
		}

		for warning in &result.warnings {
			warn!(target: "rollback", database, warning = %warning, "Non-fatal restore step failed");
		}
		result
	}

	async fn post_restore_cleanup(&self, snapshot: &Snapshot, warnings: &mut Vec<String>) {
		let objects = match self.engine.list_snapshot_objects().await {
			Ok(objects) => objects,
			Err(e) => {
				warnings.push(format!("post-restore scan: {}", e));
				return;
			}
		};

		// Objects carry the group name the snapshot was taken under
		let prefix = identity::group_prefix(&snapshot.group_name);
		for object in objects.iter().filter(|o| {
			o.name.starts_with(&prefix) && snapshot.entry_for(&o.source_database).is_some()
		}) {
			debug!(target: "rollback", object = %object.name, "Dropping leftover snapshot object");
			if let Err(e) = self.engine.drop_database(&object.name).await {
				warnings.push(format!("drop leftover {}: {}", object.name, e));
			}
		}
	}

	fn log_stage(&self, snapshot: &Snapshot, stage: RollbackStage) {
		debug!(target: "rollback", snapshot_id = %snapshot.id, stage = %stage, "Entering stage");
	}

	fn record(&self, snapshot: &Snapshot, status: &str, results: &[RestoreResult]) {
		record_history(
			self.store.as_ref(),
			self.clock.as_ref(),
			OperationType::Rollback,
			serde_json::json!({
				"group_id": snapshot.group_id,
				"snapshot_id": snapshot.id,
				"display_name": snapshot.display_name,
				"status": status,
			}),
			results.iter().map(OperationResult::from).collect(),
		);
	}
}
