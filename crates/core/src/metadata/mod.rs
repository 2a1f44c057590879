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

mod file;
mod memory;

use rewind_sdk::{DatabaseGroup, HistoryEntry, Snapshot};
use thiserror::Error;

pub use file::JsonFileMetadataStore;
pub use memory::MemoryMetadataStore;

/// Error types for metadata store operations
#[derive(Debug, Error)]
pub enum MetadataError {
	#[error("Metadata I/O error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Metadata serialization error: {0}")]
	Json(#[from] serde_json::Error),
	#[error("Snapshot already exists: {0}")]
	DuplicateSnapshot(String),
	#[error("Metadata store lock poisoned: {0}")]
	Poisoned(String),
}

/// Metadata Store trait - the local record of groups, snapshots and history
///
/// The store is the core's view of what it created. It is not
/// transactional with the engine: a crash between an engine command and
/// the matching metadata write leaves drift that reconciliation repairs.
///
/// Group membership is owned by an outer management layer; the core only
/// reads it.
pub trait MetadataStore: Send + Sync {
	fn get_all_groups(&self) -> Result<Vec<DatabaseGroup>, MetadataError>;

	fn get_all_snapshots(&self) -> Result<Vec<Snapshot>, MetadataError>;

	/// Insert a snapshot record; ids are unique
	fn add_snapshot(&self, snapshot: &Snapshot) -> Result<(), MetadataError>;

	/// Delete a snapshot record; returns false if it did not exist
	fn delete_snapshot(&self, snapshot_id: &str) -> Result<bool, MetadataError>;

	fn add_history_entry(&self, entry: &HistoryEntry) -> Result<(), MetadataError>;

	fn get_group(&self, group_id: &str) -> Result<Option<DatabaseGroup>, MetadataError> {
		Ok(self
			.get_all_groups()?
			.into_iter()
			.find(|g| g.id == group_id))
	}

	fn get_snapshot(&self, snapshot_id: &str) -> Result<Option<Snapshot>, MetadataError> {
		Ok(self
			.get_all_snapshots()?
			.into_iter()
			.find(|s| s.id == snapshot_id))
	}

	/// Snapshots of a group, newest sequence first
	fn snapshots_for_group(&self, group_id: &str) -> Result<Vec<Snapshot>, MetadataError> {
		let mut snapshots: Vec<_> = self
			.get_all_snapshots()?
			.into_iter()
			.filter(|s| s.group_id == group_id)
			.collect();
		snapshots.sort_by(|a, b| b.sequence.cmp(&a.sequence));
		Ok(snapshots)
	}

	/// Delete every snapshot record of a group; returns the deleted ids
	fn delete_snapshots_for_group(&self, group_id: &str) -> Result<Vec<String>, MetadataError> {
		let mut deleted = Vec::new();
		for snapshot in self.snapshots_for_group(group_id)? {
			if self.delete_snapshot(&snapshot.id)? {
				deleted.push(snapshot.id);
			}
		}
		Ok(deleted)
	}
}
