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
	collections::{BTreeMap, HashSet},
	sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use rewind_sdk::EngineSnapshotObject;

use super::{DataFile, DatabaseState, EngineError, EngineGateway, SparseFile};

/// Engine operations, as recorded in the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
	ListSnapshotObjects,
	SnapshotExists,
	ListDataFiles,
	DatabaseState,
	CreateSnapshot,
	DropDatabase,
	RestoreFromSnapshot,
	RestoreWithRecovery,
	SetSingleUser,
	SetMultiUser,
	TerminateSessions,
}

impl EngineOp {
	/// True for operations that change engine state
	pub fn is_mutating(self) -> bool {
		!matches!(
			self,
			Self::ListSnapshotObjects | Self::SnapshotExists | Self::ListDataFiles | Self::DatabaseState
		)
	}
}

/// One recorded gateway call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCall {
	pub op: EngineOp,
	pub target: String,
}

/// Wildcard target for [`MemoryEngine::fail_on`]
pub const ANY_TARGET: &str = "*";

struct SourceDatabase {
	data: String,
	/// (logical name, is log file)
	files: Vec<(String, bool)>,
	state: DatabaseState,
	single_user: bool,
	sessions: u32,
}

struct SnapshotObject {
	source: String,
	data: String,
	files: Vec<SparseFile>,
}

#[derive(Default)]
struct MemoryCatalog {
	databases: BTreeMap<String, SourceDatabase>,
	snapshots: BTreeMap<String, SnapshotObject>,
	failures: HashSet<(EngineOp, String)>,
	calls: Vec<EngineCall>,
}

impl MemoryCatalog {
	fn record(&mut self, op: EngineOp, target: &str) -> Result<(), EngineError> {
		self.calls.push(EngineCall {
			op,
			target: target.to_string(),
		});

		if self.failures.contains(&(op, target.to_string()))
			|| self.failures.contains(&(op, ANY_TARGET.to_string()))
		{
			return Err(EngineError::CommandRejected(format!(
				"injected failure: {:?} {}",
				op, target
			)));
		}
		Ok(())
	}

	fn database_mut(&mut self, name: &str) -> Result<&mut SourceDatabase, EngineError> {
		self.databases
			.get_mut(name)
			.ok_or_else(|| EngineError::DatabaseNotFound(name.to_string()))
	}
}

/// In-memory engine for development and testing
///
/// Simulates the parts of the catalog the snapshot core depends on:
/// - Source databases carry an opaque data payload
/// - Snapshot objects copy the payload of their source at creation time
/// - Restore requires the target to be the only snapshot of its source
///   and no attached sessions, and consumes the snapshot on success
///
/// Failures can be injected per operation and target, and every call is
/// recorded so tests can assert which commands were issued.
pub struct MemoryEngine {
	catalog: Mutex<MemoryCatalog>,
}

impl MemoryEngine {
	pub fn new() -> Self {
		Self {
			catalog: Mutex::new(MemoryCatalog::default()),
		}
	}

	fn catalog(&self) -> Result<MutexGuard<'_, MemoryCatalog>, EngineError> {
		self.catalog
			.lock()
			.map_err(|e| EngineError::QueryFailed(format!("engine state poisoned: {}", e)))
	}

	fn with_catalog<T>(&self, f: impl FnOnce(&mut MemoryCatalog) -> T) -> T {
		let mut guard = match self.catalog.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		};
		f(&mut guard)
	}

	/// Add a source database with one data file and one log file
	pub fn add_database(&self, name: &str, data: &str) {
		let log = format!("{}_log", name);
		self.add_database_with_files(name, data, &[(name, false), (log.as_str(), true)]);
	}

	/// Add a source database with explicit files as (logical name, is log)
	pub fn add_database_with_files(&self, name: &str, data: &str, files: &[(&str, bool)]) {
		self.with_catalog(|c| {
			c.databases.insert(
				name.to_string(),
				SourceDatabase {
					data: data.to_string(),
					files: files
						.iter()
						.map(|(n, is_log)| (n.to_string(), *is_log))
						.collect(),
					state: DatabaseState::Online,
					single_user: false,
					sessions: 0,
				},
			);
		});
	}

	pub fn set_data(&self, database: &str, data: &str) {
		self.with_catalog(|c| {
			if let Some(db) = c.databases.get_mut(database) {
				db.data = data.to_string();
			}
		});
	}

	pub fn data(&self, database: &str) -> Option<String> {
		self.with_catalog(|c| c.databases.get(database).map(|db| db.data.clone()))
	}

	pub fn set_state(&self, database: &str, state: DatabaseState) {
		self.with_catalog(|c| {
			if let Some(db) = c.databases.get_mut(database) {
				db.state = state;
			}
		});
	}

	pub fn state(&self, database: &str) -> Option<DatabaseState> {
		self.with_catalog(|c| c.databases.get(database).map(|db| db.state.clone()))
	}

	pub fn set_sessions(&self, database: &str, sessions: u32) {
		self.with_catalog(|c| {
			if let Some(db) = c.databases.get_mut(database) {
				db.sessions = sessions;
			}
		});
	}

	pub fn is_single_user(&self, database: &str) -> Option<bool> {
		self.with_catalog(|c| c.databases.get(database).map(|db| db.single_user))
	}

	/// Create a snapshot object behind the gateway's back (not logged)
	pub fn add_external_snapshot(&self, name: &str, source: &str) {
		self.with_catalog(|c| {
			let data = c
				.databases
				.get(source)
				.map(|db| db.data.clone())
				.unwrap_or_default();
			c.snapshots.insert(
				name.to_string(),
				SnapshotObject {
					source: source.to_string(),
					data,
					files: Vec::new(),
				},
			);
		});
	}

	/// Drop a snapshot object behind the gateway's back (not logged)
	pub fn drop_out_of_band(&self, name: &str) -> bool {
		self.with_catalog(|c| c.snapshots.remove(name).is_some())
	}

	/// Make `op` fail for `target` (or for any target with [`ANY_TARGET`])
	pub fn fail_on(&self, op: EngineOp, target: &str) {
		self.with_catalog(|c| {
			c.failures.insert((op, target.to_string()));
		});
	}

	pub fn clear_failures(&self) {
		self.with_catalog(|c| c.failures.clear());
	}

	pub fn calls(&self) -> Vec<EngineCall> {
		self.with_catalog(|c| c.calls.clone())
	}

	pub fn mutating_calls(&self) -> Vec<EngineCall> {
		self.with_catalog(|c| {
			c.calls
				.iter()
				.filter(|call| call.op.is_mutating())
				.cloned()
				.collect()
		})
	}

	pub fn clear_calls(&self) {
		self.with_catalog(|c| c.calls.clear());
	}

	pub fn snapshot_names(&self) -> Vec<String> {
		self.with_catalog(|c| c.snapshots.keys().cloned().collect())
	}

	pub fn snapshot_files(&self, name: &str) -> Option<Vec<SparseFile>> {
		self.with_catalog(|c| c.snapshots.get(name).map(|s| s.files.clone()))
	}
}

impl Default for MemoryEngine {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl EngineGateway for MemoryEngine {
	async fn list_snapshot_objects(&self) -> Result<Vec<EngineSnapshotObject>, EngineError> {
		let mut c = self.catalog()?;
		c.record(EngineOp::ListSnapshotObjects, "")?;
		Ok(c
			.snapshots
			.iter()
			.map(|(name, snap)| EngineSnapshotObject {
				name: name.clone(),
				source_database: snap.source.clone(),
			})
			.collect())
	}

	async fn snapshot_exists(&self, name: &str) -> Result<bool, EngineError> {
		let mut c = self.catalog()?;
		c.record(EngineOp::SnapshotExists, name)?;
		Ok(c.snapshots.contains_key(name))
	}

	async fn list_data_files(&self, database: &str) -> Result<Vec<DataFile>, EngineError> {
		let mut c = self.catalog()?;
		c.record(EngineOp::ListDataFiles, database)?;
		let db = c.database_mut(database)?;
		Ok(db
			.files
			.iter()
			.filter(|(_, is_log)| !is_log)
			.map(|(logical, _)| DataFile {
				logical_name: logical.clone(),
				physical_name: format!("/data/{}.mdf", logical),
			})
			.collect())
	}

	async fn database_state(&self, database: &str) -> Result<DatabaseState, EngineError> {
		let mut c = self.catalog()?;
		c.record(EngineOp::DatabaseState, database)?;
		Ok(c.database_mut(database)?.state.clone())
	}

	async fn create_snapshot_database(
		&self,
		source: &str,
		snapshot_name: &str,
		files: &[SparseFile],
	) -> Result<(), EngineError> {
		let mut c = self.catalog()?;
		c.record(EngineOp::CreateSnapshot, snapshot_name)?;

		if c.snapshots.contains_key(snapshot_name) || c.databases.contains_key(snapshot_name) {
			return Err(EngineError::CommandRejected(format!(
				"database {} already exists",
				snapshot_name
			)));
		}
		if files.is_empty() {
			return Err(EngineError::CommandRejected(
				"snapshot requires at least one sparse file".to_string(),
			));
		}

		let data = c.database_mut(source)?.data.clone();
		c.snapshots.insert(
			snapshot_name.to_string(),
			SnapshotObject {
				source: source.to_string(),
				data,
				files: files.to_vec(),
			},
		);
		Ok(())
	}

	async fn drop_database(&self, name: &str) -> Result<(), EngineError> {
		let mut c = self.catalog()?;
		c.record(EngineOp::DropDatabase, name)?;
		c.snapshots.remove(name);
		Ok(())
	}

	async fn restore_from_snapshot(
		&self,
		database: &str,
		snapshot_name: &str,
	) -> Result<(), EngineError> {
		let mut c = self.catalog()?;
		c.record(EngineOp::RestoreFromSnapshot, database)?;

		let snapshot_data = match c.snapshots.get(snapshot_name) {
			Some(snap) if snap.source == database => snap.data.clone(),
			Some(snap) => {
				return Err(EngineError::CommandRejected(format!(
					"{} is a snapshot of {}, not {}",
					snapshot_name, snap.source, database
				)));
			}
			None => return Err(EngineError::DatabaseNotFound(snapshot_name.to_string())),
		};

		let others = c
			.snapshots
			.iter()
			.filter(|(name, snap)| snap.source == database && name.as_str() != snapshot_name)
			.count();
		if others > 0 {
			return Err(EngineError::CommandRejected(format!(
				"{} has {} other snapshot(s)",
				database, others
			)));
		}

		let db = c.database_mut(database)?;
		if db.sessions > 0 && !db.single_user {
			return Err(EngineError::CommandRejected(format!(
				"{} is in use by {} session(s)",
				database, db.sessions
			)));
		}
		db.data = snapshot_data;
		db.state = DatabaseState::Online;

		c.snapshots.remove(snapshot_name);
		Ok(())
	}

	async fn restore_with_recovery(&self, database: &str) -> Result<(), EngineError> {
		let mut c = self.catalog()?;
		c.record(EngineOp::RestoreWithRecovery, database)?;
		c.database_mut(database)?.state = DatabaseState::Online;
		Ok(())
	}

	async fn set_single_user(&self, database: &str) -> Result<(), EngineError> {
		let mut c = self.catalog()?;
		c.record(EngineOp::SetSingleUser, database)?;
		let db = c.database_mut(database)?;
		db.single_user = true;
		db.sessions = 0;
		Ok(())
	}

	async fn set_multi_user(&self, database: &str) -> Result<(), EngineError> {
		let mut c = self.catalog()?;
		c.record(EngineOp::SetMultiUser, database)?;
		c.database_mut(database)?.single_user = false;
		Ok(())
	}

	async fn terminate_sessions(&self, database: &str) -> Result<u32, EngineError> {
		let mut c = self.catalog()?;
		c.record(EngineOp::TerminateSessions, database)?;
		let db = c.database_mut(database)?;
		let killed = db.sessions;
		db.sessions = 0;
		Ok(killed)
	}

	fn removal_command(&self, name: &str) -> String {
		format!("DROP DATABASE [{}]", name.replace(']', "]]"))
	}
}
