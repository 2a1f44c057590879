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

//! Fan-out checkpoint creation across a group's member databases

use std::sync::Arc;

use rewind_sdk::{DatabaseGroup, DatabaseSnapshotResult, OperationResult, OperationType, Snapshot};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
	audit::record_history,
	clock::Clock,
	config::SnapshotSettings,
	engine::EngineGateway,
	error::{DatabaseFailure, Error, Result, ValidationError},
	identity,
	metadata::MetadataStore,
};

/// Result of a create call that captured at least one database
#[derive(Debug, Clone, Serialize)]
pub struct CreationOutcome {
	pub snapshot: Snapshot,
	/// Databases that could not be captured
	pub failures: Vec<DatabaseFailure>,
}

impl CreationOutcome {
	pub fn is_complete(&self) -> bool {
		self.failures.is_empty()
	}

	/// Treat any failed database as an error
	pub fn into_result(self) -> Result<Snapshot> {
		if self.failures.is_empty() {
			Ok(self.snapshot)
		} else {
			Err(Error::PartialFailure {
				operation: format!("create snapshot {}", self.snapshot.id),
				failures: self.failures,
			})
		}
	}
}

fn failures_of(snapshot: &Snapshot) -> Vec<DatabaseFailure> {
	snapshot
		.failures()
		.map(|f| DatabaseFailure::new(&f.database, f.error.clone().unwrap_or_default()))
		.collect()
}

/// Snapshot creator - captures every member database of a group
///
/// Each database is captured independently: one failure never blocks the
/// others. The record is persisted even when some or all databases fail
/// so the failed state stays visible and can be cleaned up.
pub struct SnapshotCreator {
	engine: Arc<dyn EngineGateway>,
	store: Arc<dyn MetadataStore>,
	clock: Arc<dyn Clock>,
	settings: SnapshotSettings,
}

impl SnapshotCreator {
	pub fn new(
		engine: Arc<dyn EngineGateway>,
		store: Arc<dyn MetadataStore>,
		clock: Arc<dyn Clock>,
		settings: SnapshotSettings,
	) -> Self {
		Self {
			engine,
			store,
			clock,
			settings,
		}
	}

	/// Create a checkpoint of `group_id`
	///
	/// `display_name` defaults to `Snapshot {sequence}`. Fails outright on a
	/// violated precondition or when no database could be captured.
	pub async fn create(&self, group_id: &str, display_name: Option<&str>) -> Result<CreationOutcome> {
		let group = self
			.store
			.get_group(group_id)?
			.ok_or_else(|| ValidationError::GroupNotFound(group_id.to_string()))?;

		if group.databases.is_empty() {
			return Err(ValidationError::EmptyGroup(group.id.clone()).into());
		}

		let existing = self.store.snapshots_for_group(&group.id)?.len();
		if existing >= self.settings.max_snapshots_per_group {
			return Err(ValidationError::SnapshotLimitExceeded {
				group_id: group.id.clone(),
				limit: self.settings.max_snapshots_per_group,
			}
			.into());
		}

		let sequence = identity::next_sequence(self.store.as_ref(), &group.id)?;
		let display_name = match display_name {
			Some(raw) => {
				let name = identity::generate_display_name(raw);
				if name.is_empty() {
					return Err(ValidationError::EmptyDisplayName.into());
				}
				name
			}
			None => format!("Snapshot {}", sequence),
		};

		let snapshot = self.capture(&group, display_name, sequence, false).await;
		let failures = failures_of(&snapshot);

		if let Err(e) = self.store.add_snapshot(&snapshot) {
			warn!(
				target: "creator",
				snapshot_id = %snapshot.id,
				error = %e,
				"Failed to persist snapshot record; engine objects are now orphaned"
			);
			return Err(e.into());
		}

		record_history(
			self.store.as_ref(),
			self.clock.as_ref(),
			OperationType::CreateSnapshot,
			serde_json::json!({
				"group_id": group.id,
				"group_name": group.name,
				"snapshot_id": snapshot.id,
				"display_name": snapshot.display_name,
				"sequence": snapshot.sequence,
			}),
			snapshot
				.database_snapshots
				.iter()
				.map(OperationResult::from)
				.collect(),
		);

		info!(
			target: "creator",
			group_id = %group.id,
			snapshot_id = %snapshot.id,
			sequence = snapshot.sequence,
			succeeded = snapshot.succeeded_count(),
			failed = failures.len(),
			"Snapshot created"
		);

		if snapshot.succeeded_count() == 0 {
			return Err(Error::AllDatabasesFailed {
				snapshot_id: snapshot.id,
				failures,
			});
		}

		Ok(CreationOutcome { snapshot, failures })
	}

	/// Capture every member database without touching metadata
	///
	/// Also used by the rollback orchestrator for its automatic checkpoint.
	pub(crate) async fn capture(
		&self,
		group: &DatabaseGroup,
		display_name: String,
		sequence: u32,
		is_automatic: bool,
	) -> Snapshot {
		let created_at = self.clock.now();
		let id = identity::generate_snapshot_id(&group.name, &display_name, created_at);

		let mut database_snapshots = Vec::with_capacity(group.databases.len());
		for database in &group.databases {
			database_snapshots.push(self.capture_database(&id, database).await);
		}

		Snapshot {
			id,
			group_id: group.id.clone(),
			group_name: group.name.clone(),
			display_name,
			sequence,
			created_at,
			database_count: group.databases.len(),
			database_snapshots,
			is_automatic,
		}
	}

	async fn capture_database(&self, snapshot_id: &str, database: &str) -> DatabaseSnapshotResult {
		let snapshot_name = identity::engine_object_name(snapshot_id, database);

		let files = match self.engine.list_data_files(database).await {
			Ok(files) => files,
			Err(e) => {
				warn!(target: "creator", database, error = %e, "Failed to read data files");
				return DatabaseSnapshotResult::failed(database, snapshot_name, e.to_string());
			}
		};

		if files.is_empty() {
			let err = ValidationError::NoDataFiles(database.to_string());
			warn!(target: "creator", database, "{}", err);
			return DatabaseSnapshotResult::failed(database, snapshot_name, err.to_string());
		}

		let sparse = identity::sparse_files(
			&self.settings.snapshot_base_path,
			snapshot_id,
			database,
			&files,
		);

		match self
			.engine
			.create_snapshot_database(database, &snapshot_name, &sparse)
			.await
		{
			Ok(()) => {
				debug!(
					target: "creator",
					database,
					snapshot_name = %snapshot_name,
					files = sparse.len(),
					"Snapshot database created"
				);
				DatabaseSnapshotResult::succeeded(database, snapshot_name)
			}
			Err(e) => {
				warn!(
					target: "creator",
					database,
					snapshot_name = %snapshot_name,
					error = %e,
					"Failed to create snapshot database"
				);
				DatabaseSnapshotResult::failed(database, snapshot_name, e.to_string())
			}
		}
	}
}
