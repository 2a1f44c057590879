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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named set of source databases checkpointed and rolled back together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseGroup {
	/// Group identifier
	pub id: String,
	/// Operator-facing group name
	pub name: String,
	/// Member databases, in checkpoint order
	pub databases: Vec<String>,
	/// When the group was created
	pub created_at: DateTime<Utc>,
}

impl DatabaseGroup {
	pub fn new(id: impl Into<String>, name: impl Into<String>, databases: Vec<String>) -> Self {
		Self {
			id: id.into(),
			name: name.into(),
			databases,
			created_at: Utc::now(),
		}
	}

	pub fn contains(&self, database: &str) -> bool {
		self.databases.iter().any(|d| d == database)
	}
}

/// Per-database outcome of a checkpoint creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSnapshotResult {
	/// Source database name
	pub database: String,
	/// Engine snapshot object name (`{snapshot_id}_{database}`)
	pub snapshot_name: String,
	/// Whether the engine object was created
	pub success: bool,
	/// Failure detail (failed entries carry no usable engine object)
	#[serde(default)]
	pub error: Option<String>,
}

impl DatabaseSnapshotResult {
	pub fn succeeded(database: impl Into<String>, snapshot_name: impl Into<String>) -> Self {
		Self {
			database: database.into(),
			snapshot_name: snapshot_name.into(),
			success: true,
			error: None,
		}
	}

	pub fn failed(
		database: impl Into<String>,
		snapshot_name: impl Into<String>,
		error: impl Into<String>,
	) -> Self {
		Self {
			database: database.into(),
			snapshot_name: snapshot_name.into(),
			success: false,
			error: Some(error.into()),
		}
	}
}

/// A checkpoint of a database group
///
/// Immutable once created; it is only ever deleted as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
	/// Deterministic id: `{normalized_group_name}_{hash8}`
	pub id: String,
	pub group_id: String,
	/// Denormalized group name at creation time
	pub group_name: String,
	/// Operator label
	pub display_name: String,
	/// Per-group sequence, reset to 1 after a rollback
	pub sequence: u32,
	pub created_at: DateTime<Utc>,
	/// Number of member databases at creation time, regardless of failures
	pub database_count: usize,
	pub database_snapshots: Vec<DatabaseSnapshotResult>,
	/// Created by the rollback orchestrator rather than an operator
	#[serde(default)]
	pub is_automatic: bool,
}

impl Snapshot {
	/// Engine object names of the successfully captured databases
	pub fn engine_object_names(&self) -> impl Iterator<Item = &str> {
		self.database_snapshots
			.iter()
			.filter(|d| d.success)
			.map(|d| d.snapshot_name.as_str())
	}

	/// Entries that failed at creation time
	pub fn failures(&self) -> impl Iterator<Item = &DatabaseSnapshotResult> {
		self.database_snapshots.iter().filter(|d| !d.success)
	}

	pub fn succeeded_count(&self) -> usize {
		self.database_snapshots.iter().filter(|d| d.success).count()
	}

	/// True when every member database was captured
	pub fn is_complete(&self) -> bool {
		!self.database_snapshots.is_empty() && self.database_snapshots.iter().all(|d| d.success)
	}

	pub fn entry_for(&self, database: &str) -> Option<&DatabaseSnapshotResult> {
		self.database_snapshots.iter().find(|d| d.database == database)
	}
}

/// A native snapshot database as seen in the engine catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineSnapshotObject {
	/// Catalog name of the snapshot database
	pub name: String,
	/// Name of the live database it shadows
	pub source_database: String,
}

/// Kind of operation recorded in the audit history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
	CreateSnapshot,
	DeleteSnapshot,
	Rollback,
	AutomaticCheckpoint,
	HealStaleMetadata,
	CleanupOrphans,
	CleanupInvalid,
}

/// Result of an individual per-database step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
	pub database: String,
	pub success: bool,
	#[serde(default)]
	pub error: Option<String>,
}

impl From<&DatabaseSnapshotResult> for OperationResult {
	fn from(result: &DatabaseSnapshotResult) -> Self {
		Self {
			database: result.database.clone(),
			success: result.success,
			error: result.error.clone(),
		}
	}
}

/// Audit history entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
	pub id: String,
	#[serde(rename = "type")]
	pub operation: OperationType,
	pub timestamp: DateTime<Utc>,
	#[serde(default)]
	pub details: serde_json::Value,
	#[serde(default)]
	pub results: Vec<OperationResult>,
}

/// Outcome of comparing metadata against the engine catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
	/// True iff nothing was orphaned or missing before healing
	pub verified: bool,
	/// Engine objects unknown to metadata (reported, never auto-deleted)
	pub orphaned_in_engine: Vec<String>,
	/// Metadata references with no engine object that could not be healed
	pub missing_in_engine: Vec<String>,
	/// Human-readable notes, including what self-heal removed
	pub issues: Vec<String>,
	/// Snapshot records removed by self-heal during this pass
	#[serde(default)]
	pub healed_snapshots: Vec<String>,
}
