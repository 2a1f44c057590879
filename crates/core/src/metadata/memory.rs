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

use std::sync::{Mutex, MutexGuard};

use rewind_sdk::{DatabaseGroup, HistoryEntry, Snapshot};

use super::{MetadataError, MetadataStore};
use crate::config::DEFAULT_MAX_HISTORY_ENTRIES;

#[derive(Default)]
struct MemoryRecords {
	groups: Vec<DatabaseGroup>,
	snapshots: Vec<Snapshot>,
	history: Vec<HistoryEntry>,
}

/// In-memory metadata store
///
/// Suitable for:
/// - Development and testing
/// - Embedding where the caller persists records elsewhere
///
/// History is capped like the file store: the oldest entries are dropped
/// once the limit is exceeded.
pub struct MemoryMetadataStore {
	records: Mutex<MemoryRecords>,
	max_history_entries: usize,
}

impl MemoryMetadataStore {
	pub fn new() -> Self {
		Self::with_history_limit(DEFAULT_MAX_HISTORY_ENTRIES)
	}

	pub fn with_history_limit(max_history_entries: usize) -> Self {
		Self {
			records: Mutex::new(MemoryRecords::default()),
			max_history_entries,
		}
	}

	fn records(&self) -> Result<MutexGuard<'_, MemoryRecords>, MetadataError> {
		self.records
			.lock()
			.map_err(|e| MetadataError::Poisoned(e.to_string()))
	}

	/// Insert or replace a group
	pub fn add_group(&self, group: DatabaseGroup) -> Result<(), MetadataError> {
		let mut records = self.records()?;
		records.groups.retain(|g| g.id != group.id);
		records.groups.push(group);
		Ok(())
	}

	/// Audit entries in insertion order
	pub fn history(&self) -> Result<Vec<HistoryEntry>, MetadataError> {
		Ok(self.records()?.history.clone())
	}
}

impl Default for MemoryMetadataStore {
	fn default() -> Self {
		Self::new()
	}
}

impl MetadataStore for MemoryMetadataStore {
	fn get_all_groups(&self) -> Result<Vec<DatabaseGroup>, MetadataError> {
		Ok(self.records()?.groups.clone())
	}

	fn get_all_snapshots(&self) -> Result<Vec<Snapshot>, MetadataError> {
		Ok(self.records()?.snapshots.clone())
	}

	fn add_snapshot(&self, snapshot: &Snapshot) -> Result<(), MetadataError> {
		let mut records = self.records()?;
		if records.snapshots.iter().any(|s| s.id == snapshot.id) {
			return Err(MetadataError::DuplicateSnapshot(snapshot.id.clone()));
		}
		records.snapshots.push(snapshot.clone());
		Ok(())
	}

	fn delete_snapshot(&self, snapshot_id: &str) -> Result<bool, MetadataError> {
		let mut records = self.records()?;
		let before = records.snapshots.len();
		records.snapshots.retain(|s| s.id != snapshot_id);
		Ok(records.snapshots.len() != before)
	}

	fn add_history_entry(&self, entry: &HistoryEntry) -> Result<(), MetadataError> {
		let mut records = self.records()?;
		records.history.push(entry.clone());
		if records.history.len() > self.max_history_entries {
			let excess = records.history.len() - self.max_history_entries;
			records.history.drain(..excess);
		}
		Ok(())
	}
}
