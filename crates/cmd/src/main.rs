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

//! Rewind operator CLI
//!
//! Checkpoints and rolls back groups of SQL Server databases. Results are
//! printed to stdout as JSON; logs go to the rolling log file (and stderr
//! when LOG_TO_CONSOLE is set).

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rewind_core::{
	CleanupAuthorization, JsonFileMetadataStore, RewindConfig, SnapshotService, SystemClock,
	logging::init_logging,
};
use rewind_mssql::SqlServerGateway;
use rewind_sdk::DatabaseGroup;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "rewind", version, author, long_about = None)]
struct Args {
	/// Configuration file (REWIND__* environment variables still apply)
	#[arg(short, long)]
	config: Option<String>,

	/// Skip the startup sweep of leftovers from interrupted runs
	#[arg(long, default_value_t = false)]
	no_sweep: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Register or replace a database group
	AddGroup {
		id: String,
		name: String,
		#[arg(required = true)]
		databases: Vec<String>,
	},
	/// Checkpoint every database of a group
	Create {
		group_id: String,
		/// Label; defaults to "Snapshot {sequence}"
		#[arg(short, long)]
		name: Option<String>,
	},
	/// List a group's snapshots, newest first
	List { group_id: String },
	/// Drop a snapshot's engine objects and its record
	Delete { snapshot_id: String },
	/// Show engine snapshots that would block a rollback
	CheckExternal { snapshot_id: String },
	/// Roll a group back to a snapshot
	Rollback { snapshot_id: String },
	/// Remove a snapshot that failed for some databases
	CleanupInvalid { snapshot_id: String },
	/// Compare engine and metadata, healing stale records
	Verify,
	/// Drop orphaned engine snapshots
	CleanupOrphaned {
		/// Names to drop; omit together with --all to only list them
		names: Vec<String>,
		/// Drop every orphan
		#[arg(long, default_value_t = false)]
		all: bool,
	},
	/// Remove records whose engine objects are gone
	CleanupStale,
	/// Show the audit trail
	History,
}

fn print<T: Serialize>(value: &T) -> Result<()> {
	println!(
		"{}",
		serde_json::to_string_pretty(value).context("Failed to serialize result")?
	);
	Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();

	init_logging()?;

	let config = match &args.config {
		Some(path) => RewindConfig::from_file(path)
			.with_context(|| format!("Failed to load configuration from {}", path))?,
		None => RewindConfig::from_env().context("Failed to load configuration")?,
	};

	let store = Arc::new(
		JsonFileMetadataStore::open(&config.metadata_path, config.max_history_entries)
			.with_context(|| format!("Failed to open metadata store {}", config.metadata_path))?,
	);

	// Commands that only touch metadata
	match &args.command {
		Command::AddGroup {
			id,
			name,
			databases,
		} => {
			let group = DatabaseGroup::new(id.as_str(), name.as_str(), databases.clone());
			store.add_group(group.clone())?;
			info!(target: "server", group_id = %group.id, "Group saved");
			return print(&group);
		}
		Command::History => return print(&store.history()?),
		_ => {}
	}

	let connection = config.engine_connection()?;
	let engine = Arc::new(
		SqlServerGateway::connect(connection)
			.await
			.context("Failed to connect to SQL Server")?,
	);

	let service = SnapshotService::new(
		engine,
		store,
		Arc::new(SystemClock),
		config.snapshot_settings(),
	);

	if config.startup_sweep && !args.no_sweep {
		match service.startup_sweep().await {
			Ok(report) if report.dropped_count() > 0 => {
				info!(target: "server", dropped = report.dropped_count(), "Startup sweep removed leftovers");
			}
			Ok(_) => {}
			Err(e) => warn!(target: "server", error = %e, "Startup sweep failed"),
		}
	}

	match args.command {
		Command::Create { group_id, name } => {
			print(&service.create_snapshot(&group_id, name.as_deref()).await?)
		}
		Command::List { group_id } => print(&service.list_snapshots(&group_id)?),
		Command::Delete { snapshot_id } => print(&service.delete_snapshot(&snapshot_id).await?),
		Command::CheckExternal { snapshot_id } => {
			print(&service.check_external(&snapshot_id).await?)
		}
		Command::Rollback { snapshot_id } => {
			let outcome = service.rollback(&snapshot_id).await?;
			print(&outcome)?;
			outcome.into_result()?;
			Ok(())
		}
		Command::CleanupInvalid { snapshot_id } => {
			print(&service.cleanup_invalid(&snapshot_id).await?)
		}
		Command::Verify => print(&service.verify().await?),
		Command::CleanupOrphaned { names, all } => {
			let authorization = if all {
				CleanupAuthorization::All
			} else {
				CleanupAuthorization::Names(names)
			};
			print(&service.cleanup_orphaned(&authorization).await?)
		}
		Command::CleanupStale => print(&service.cleanup_stale_metadata().await?),
		Command::AddGroup { .. } | Command::History => Ok(()),
	}
}
