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

//! Rewind snapshot core
//!
//! Checkpoints groups of databases with engine-native copy-on-write
//! snapshots and rolls a whole group back to any of them.
//!
//! Architecture:
//! - Engine Gateway port for catalog reads and lifecycle commands
//! - Metadata Store port for groups, snapshot records and history
//! - Reconciler that repairs drift between the two on every verify
//! - Per-group locks around every mutating operation

pub mod audit;
pub mod cleanup;
pub mod clock;
pub mod config;
pub mod creator;
pub mod engine;
pub mod error;
pub mod identity;
pub mod lock;
pub mod logging;
pub mod metadata;
pub mod reconcile;
pub mod rollback;
pub mod service;

pub use cleanup::{CleanupAuthorization, CleanupReport, InvalidCleanupReport, OrphanCleanupService};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{EngineConnectionConfig, RewindConfig, SnapshotSettings};
pub use creator::{CreationOutcome, SnapshotCreator};
pub use engine::{DataFile, DatabaseState, EngineError, EngineGateway, MemoryEngine, SparseFile};
pub use error::{DatabaseFailure, Error, Result, ValidationError};
pub use lock::GroupLocks;
pub use metadata::{JsonFileMetadataStore, MemoryMetadataStore, MetadataError, MetadataStore};
pub use reconcile::ConsistencyReconciler;
pub use rollback::{
	CheckpointStatus, ExternalSnapshot, PreCheckReport, RestoreResult, RollbackOrchestrator,
	RollbackOutcome,
};
pub use service::{DeletionReport, SnapshotService};
