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

//! Engine Gateway port
//!
//! Everything the snapshot core asks of the relational engine goes
//! through [`EngineGateway`]: catalog reads and the lifecycle commands for
//! native copy-on-write snapshot databases. Implementations must treat
//! every name they receive as untrusted and quote or bind it; no caller
//! pre-escapes anything.

mod memory;

use async_trait::async_trait;
use rewind_sdk::EngineSnapshotObject;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::{ANY_TARGET, EngineCall, EngineOp, MemoryEngine};

/// Error types for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Connection failed: {0}")]
	ConnectionFailed(String),
	#[error("Query failed: {0}")]
	QueryFailed(String),
	#[error("Command rejected: {0}")]
	CommandRejected(String),
	#[error("Database not found: {0}")]
	DatabaseNotFound(String),
	#[error("Invalid identifier: {0}")]
	InvalidIdentifier(String),
}

/// A data file of a source database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFile {
	pub logical_name: String,
	pub physical_name: String,
}

/// A sparse file backing one data file of a snapshot database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseFile {
	pub logical_name: String,
	pub path: String,
}

/// Catalog state of a database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseState {
	Online,
	Restoring,
	Recovering,
	Offline,
	Other(String),
}

impl DatabaseState {
	/// Parse the engine's state description (e.g. `ONLINE`, `RESTORING`)
	pub fn from_description(desc: &str) -> Self {
		match desc.trim().to_ascii_uppercase().as_str() {
			"ONLINE" => Self::Online,
			"RESTORING" => Self::Restoring,
			"RECOVERING" | "RECOVERY_PENDING" => Self::Recovering,
			"OFFLINE" => Self::Offline,
			other => Self::Other(other.to_string()),
		}
	}

	/// True when a previous restore was interrupted part-way
	pub fn is_mid_restore(&self) -> bool {
		matches!(self, Self::Restoring | Self::Recovering)
	}
}

/// Engine Gateway trait - the catalog and command surface of the engine
///
/// All calls are blocking round-trips from the caller's point of view;
/// the core drives them sequentially.
#[async_trait]
pub trait EngineGateway: Send + Sync {
	/// Every catalog database with a non-null source database
	async fn list_snapshot_objects(&self) -> Result<Vec<EngineSnapshotObject>, EngineError>;

	/// Whether a snapshot database with this name exists
	async fn snapshot_exists(&self, name: &str) -> Result<bool, EngineError>;

	/// Data files of a database, log files excluded
	async fn list_data_files(&self, database: &str) -> Result<Vec<DataFile>, EngineError>;

	async fn database_state(&self, database: &str) -> Result<DatabaseState, EngineError>;

	/// Create `snapshot_name` as a copy-on-write snapshot of `source`
	async fn create_snapshot_database(
		&self,
		source: &str,
		snapshot_name: &str,
		files: &[SparseFile],
	) -> Result<(), EngineError>;

	/// Drop a database if it exists
	async fn drop_database(&self, name: &str) -> Result<(), EngineError>;

	/// Revert `database` to `snapshot_name`
	async fn restore_from_snapshot(
		&self,
		database: &str,
		snapshot_name: &str,
	) -> Result<(), EngineError>;

	/// Bring a database left mid-restore back online
	async fn restore_with_recovery(&self, database: &str) -> Result<(), EngineError>;

	/// Exclusive access, rolling back in-flight transactions immediately
	async fn set_single_user(&self, database: &str) -> Result<(), EngineError>;

	async fn set_multi_user(&self, database: &str) -> Result<(), EngineError>;

	/// Kill every session attached to `database`; returns how many were killed
	async fn terminate_sessions(&self, database: &str) -> Result<u32, EngineError>;

	/// A ready-to-run statement an operator can use to drop `name`
	fn removal_command(&self, name: &str) -> String;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_state_description() {
		assert_eq!(DatabaseState::from_description("ONLINE"), DatabaseState::Online);
		assert!(DatabaseState::from_description("restoring").is_mid_restore());
		assert!(DatabaseState::from_description("RECOVERY_PENDING").is_mid_restore());
		assert!(!DatabaseState::from_description("SUSPECT").is_mid_restore());
	}
}
