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

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{engine::EngineError, metadata::MetadataError, rollback::ExternalSnapshot};

/// Precondition violations; nothing destructive has happened when one is returned
#[derive(Debug, Error)]
pub enum ValidationError {
	#[error("Group not found: {0}")]
	GroupNotFound(String),
	#[error("Snapshot not found: {0}")]
	SnapshotNotFound(String),
	#[error("Group {group_id} already holds {limit} snapshots")]
	SnapshotLimitExceeded { group_id: String, limit: usize },
	#[error("No data files found for database {0}")]
	NoDataFiles(String),
	#[error("Snapshot display name must not be empty")]
	EmptyDisplayName,
	#[error("Group {0} has no member databases")]
	EmptyGroup(String),
	#[error("Snapshot {0} has failed databases; clean it up instead of rolling back to it")]
	IncompleteSnapshot(String),
	#[error("Snapshot {0} is complete; nothing to clean up")]
	SnapshotNotInvalid(String),
	#[error("Snapshot {snapshot_id} is missing engine objects: {missing:?}")]
	SnapshotObjectsMissing {
		snapshot_id: String,
		missing: Vec<String>,
	},
}

/// A single database that failed inside a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseFailure {
	pub database: String,
	pub error: String,
}

impl DatabaseFailure {
	pub fn new(database: impl Into<String>, error: impl Into<String>) -> Self {
		Self {
			database: database.into(),
			error: error.into(),
		}
	}
}

fn describe(failures: &[DatabaseFailure]) -> String {
	failures
		.iter()
		.map(|f| format!("{}: {}", f.database, f.error))
		.collect::<Vec<_>>()
		.join("; ")
}

fn describe_external(external: &[ExternalSnapshot]) -> String {
	external
		.iter()
		.map(|e| e.name.as_str())
		.collect::<Vec<_>>()
		.join(", ")
}

/// Error type for the snapshot core
#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Validation(#[from] ValidationError),
	#[error("Engine error: {0}")]
	Engine(#[from] EngineError),
	#[error("Metadata error: {0}")]
	Metadata(#[from] MetadataError),
	#[error("External snapshots block rollback: {}", describe_external(.0))]
	Consistency(Vec<ExternalSnapshot>),
	#[error("{operation} partially failed: {}", describe(.failures))]
	PartialFailure {
		operation: String,
		failures: Vec<DatabaseFailure>,
	},
	#[error("Snapshot {snapshot_id} failed for every database: {}", describe(.failures))]
	AllDatabasesFailed {
		snapshot_id: String,
		failures: Vec<DatabaseFailure>,
	},
	#[error("Configuration error: {0}")]
	Configuration(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_partial_failure_lists_databases() {
		let err = Error::PartialFailure {
			operation: "create".to_string(),
			failures: vec![
				DatabaseFailure::new("orders", "disk full"),
				DatabaseFailure::new("ledger", "permission denied"),
			],
		};

		let msg = err.to_string();
		assert!(msg.contains("orders: disk full"));
		assert!(msg.contains("ledger: permission denied"));
	}

	#[test]
	fn test_validation_is_transparent() {
		let err: Error = ValidationError::GroupNotFound("g1".to_string()).into();
		assert_eq!(err.to_string(), "Group not found: g1");
	}
}
