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

use std::{
	fs,
	path::{Path, PathBuf},
	sync::{Mutex, MutexGuard},
};

use rewind_sdk::{DatabaseGroup, HistoryEntry, Snapshot};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{MetadataError, MetadataStore};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MetadataDocument {
	#[serde(default)]
	groups: Vec<DatabaseGroup>,
	#[serde(default)]
	snapshots: Vec<Snapshot>,
	#[serde(default)]
	history: Vec<HistoryEntry>,
}

/// Metadata store persisted as a single JSON document
///
/// Every mutation rewrites the whole document through a temporary file
/// and a rename, so readers never observe a half-written file. The
/// in-memory copy only changes once the write has succeeded.
pub struct JsonFileMetadataStore {
	path: PathBuf,
	max_history_entries: usize,
	document: Mutex<MetadataDocument>,
}

impl JsonFileMetadataStore {
	/// Open the store at `path`, starting empty if the file does not exist
	pub fn open(path: impl AsRef<Path>, max_history_entries: usize) -> Result<Self, MetadataError> {
		let path = path.as_ref().to_path_buf();
		let document = if path.exists() {
			let contents = fs::read_to_string(&path)?;
			if contents.trim().is_empty() {
				MetadataDocument::default()
			} else {
				serde_json::from_str(&contents)?
			}
		} else {
			MetadataDocument::default()
		};

		debug!(
			target: "metadata",
			path = %path.display(),
			groups = document.groups.len(),
			snapshots = document.snapshots.len(),
			"Metadata file opened"
		);

		Ok(Self {
			path,
			max_history_entries,
			document: Mutex::new(document),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn document(&self) -> Result<MutexGuard<'_, MetadataDocument>, MetadataError> {
		self.document
			.lock()
			.map_err(|e| MetadataError::Poisoned(e.to_string()))
	}

	fn persist(&self, document: &MetadataDocument) -> Result<(), MetadataError> {
		if let Some(parent) = self.path.parent()
			&& !parent.as_os_str().is_empty()
		{
			fs::create_dir_all(parent)?;
		}

		let tmp = self.path.with_extension("json.tmp");
		fs::write(&tmp, serde_json::to_string_pretty(document)?)?;
		fs::rename(&tmp, &self.path)?;
		Ok(())
	}

	/// Apply `mutate` to a copy of the document and commit it once written
	fn update<T>(
		&self,
		mutate: impl FnOnce(&mut MetadataDocument) -> Result<T, MetadataError>,
	) -> Result<T, MetadataError> {
		let mut guard = self.document()?;
		let mut next = guard.clone();
		let value = mutate(&mut next)?;
		self.persist(&next)?;
		*guard = next;
		Ok(value)
	}

	/// Insert or replace a group
	pub fn add_group(&self, group: DatabaseGroup) -> Result<(), MetadataError> {
		self.update(|doc| {
			doc.groups.retain(|g| g.id != group.id);
			doc.groups.push(group);
			Ok(())
		})
	}

	/// Audit entries, oldest first
	pub fn history(&self) -> Result<Vec<HistoryEntry>, MetadataError> {
		Ok(self.document()?.history.clone())
	}
}

impl MetadataStore for JsonFileMetadataStore {
	fn get_all_groups(&self) -> Result<Vec<DatabaseGroup>, MetadataError> {
		Ok(self.document()?.groups.clone())
	}

	fn get_all_snapshots(&self) -> Result<Vec<Snapshot>, MetadataError> {
		Ok(self.document()?.snapshots.clone())
	}

	fn add_snapshot(&self, snapshot: &Snapshot) -> Result<(), MetadataError> {
		self.update(|doc| {
			if doc.snapshots.iter().any(|s| s.id == snapshot.id) {
				return Err(MetadataError::DuplicateSnapshot(snapshot.id.clone()));
			}
			doc.snapshots.push(snapshot.clone());
			Ok(())
		})
	}

	fn delete_snapshot(&self, snapshot_id: &str) -> Result<bool, MetadataError> {
		if !self.document()?.snapshots.iter().any(|s| s.id == snapshot_id) {
			return Ok(false);
		}
		self.update(|doc| {
			doc.snapshots.retain(|s| s.id != snapshot_id);
			Ok(true)
		})
	}

	fn add_history_entry(&self, entry: &HistoryEntry) -> Result<(), MetadataError> {
		let max = self.max_history_entries;
		self.update(|doc| {
			doc.history.push(entry.clone());
			if doc.history.len() > max {
				let excess = doc.history.len() - max;
				doc.history.drain(..excess);
			}
			Ok(())
		})
	}
}

#[cfg(test)]
mod tests {
	use chrono::Utc;
	use rewind_sdk::{DatabaseSnapshotResult, OperationType};

	use super::*;

	fn snapshot(id: &str) -> Snapshot {
		Snapshot {
			id: id.to_string(),
			group_id: "g1".to_string(),
			group_name: "billing".to_string(),
			display_name: "EOD".to_string(),
			sequence: 1,
			created_at: Utc::now(),
			database_count: 1,
			database_snapshots: vec![DatabaseSnapshotResult::succeeded(
				"orders",
				format!("{}_orders", id),
			)],
			is_automatic: false,
		}
	}

	fn history(n: usize) -> HistoryEntry {
		HistoryEntry {
			id: format!("h{}", n),
			operation: OperationType::CreateSnapshot,
			timestamp: Utc::now(),
			details: serde_json::Value::Null,
			results: Vec::new(),
		}
	}

	#[test]
	fn test_records_survive_reopen() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("metadata.json");

		{
			let store = JsonFileMetadataStore::open(&path, 100).unwrap();
			store
				.add_group(DatabaseGroup::new("g1", "billing", vec!["orders".to_string()]))
				.unwrap();
			store.add_snapshot(&snapshot("billing_0000aaaa")).unwrap();
		}

		let store = JsonFileMetadataStore::open(&path, 100).unwrap();
		assert_eq!(store.get_all_groups().unwrap().len(), 1);
		assert_eq!(
			store.get_snapshot("billing_0000aaaa").unwrap().unwrap().group_id,
			"g1"
		);
	}

	#[test]
	fn test_history_trimmed_to_limit() {
		let dir = tempfile::tempdir().unwrap();
		let store = JsonFileMetadataStore::open(dir.path().join("m.json"), 3).unwrap();

		for n in 0..5 {
			store.add_history_entry(&history(n)).unwrap();
		}

		let ids: Vec<_> = store.history().unwrap().into_iter().map(|h| h.id).collect();
		assert_eq!(ids, vec!["h2", "h3", "h4"]);
	}

	#[test]
	fn test_failed_insert_leaves_document_unchanged() {
		let dir = tempfile::tempdir().unwrap();
		let store = JsonFileMetadataStore::open(dir.path().join("m.json"), 10).unwrap();
		store.add_snapshot(&snapshot("s1")).unwrap();

		assert!(store.add_snapshot(&snapshot("s1")).is_err());
		assert_eq!(store.get_all_snapshots().unwrap().len(), 1);
		assert!(store.delete_snapshot("s1").unwrap());
		assert!(!store.delete_snapshot("s1").unwrap());
	}
}
