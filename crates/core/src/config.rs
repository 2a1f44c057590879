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

use crate::error::Error;

// Logging configuration constants
/// Default log level (can be overridden by RUST_LOG environment variable)
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default log directory component name
pub const LOG_COMPONENT_NAME: &str = "rewind";

/// Default console output enabled (can be overridden by LOG_TO_CONSOLE environment variable)
pub const DEFAULT_LOG_TO_CONSOLE: bool = false;

// Snapshot configuration constants
/// Maximum live snapshots per group (can be overridden by REWIND_MAX_SNAPSHOTS_PER_GROUP)
pub const DEFAULT_MAX_SNAPSHOTS_PER_GROUP: usize = 9;

/// Default directory for sparse files (can be overridden by REWIND_SNAPSHOT_BASE_PATH)
pub const DEFAULT_SNAPSHOT_BASE_PATH: &str = "C:\\Snapshots";

/// Label of the checkpoint created after a successful rollback
pub const DEFAULT_AUTOMATIC_CHECKPOINT_LABEL: &str = "Automatic checkpoint";

/// Default metadata file location (can be overridden by REWIND_METADATA_PATH)
pub const DEFAULT_METADATA_PATH: &str = "rewind-metadata.json";

/// Default number of audit entries kept by the file-backed store
pub const DEFAULT_MAX_HISTORY_ENTRIES: usize = 100;

/// Environment variable prefix for all settings
pub const ENV_PREFIX: &str = "REWIND";

/// Engine connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConnectionConfig {
	pub host: String,
	pub port: u16,
	pub username: String,
	pub password: String,
	pub trust_certificate: bool,
}

impl Default for EngineConnectionConfig {
	fn default() -> Self {
		Self {
			host: String::new(),
			port: 1433,
			username: "sa".to_string(),
			password: String::new(),
			trust_certificate: true,
		}
	}
}

impl EngineConnectionConfig {
	pub fn is_configured(&self) -> bool {
		!self.host.trim().is_empty()
	}
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewindConfig {
	/// Directory the engine writes sparse files into
	pub snapshot_base_path: String,
	/// Live snapshot records allowed per group
	pub max_snapshots_per_group: usize,
	/// JSON metadata file
	pub metadata_path: String,
	/// Audit entries kept by the metadata file
	pub max_history_entries: usize,
	/// Drop recognized leftovers from interrupted runs at startup
	pub startup_sweep: bool,
	/// Label given to the checkpoint taken right after a rollback
	pub automatic_checkpoint_label: String,
	/// Engine connection
	pub engine: EngineConnectionConfig,
}

impl Default for RewindConfig {
	fn default() -> Self {
		Self {
			snapshot_base_path: DEFAULT_SNAPSHOT_BASE_PATH.to_string(),
			max_snapshots_per_group: DEFAULT_MAX_SNAPSHOTS_PER_GROUP,
			metadata_path: DEFAULT_METADATA_PATH.to_string(),
			max_history_entries: DEFAULT_MAX_HISTORY_ENTRIES,
			startup_sweep: true,
			automatic_checkpoint_label: DEFAULT_AUTOMATIC_CHECKPOINT_LABEL.to_string(),
			engine: EngineConnectionConfig::default(),
		}
	}
}

impl RewindConfig {
	/// Load configuration from environment variables
	pub fn from_env() -> Result<Self, config::ConfigError> {
		let cfg = config::Config::builder()
			.add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
			.build()?;

		cfg.try_deserialize()
	}

	/// Load configuration from file
	pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
		let cfg = config::Config::builder()
			.add_source(config::File::with_name(path))
			.add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
			.build()?;

		cfg.try_deserialize()
	}

	/// Settings consumed by the snapshot components
	pub fn snapshot_settings(&self) -> SnapshotSettings {
		SnapshotSettings {
			snapshot_base_path: self.snapshot_base_path.clone(),
			max_snapshots_per_group: self.max_snapshots_per_group,
			automatic_checkpoint_label: self.automatic_checkpoint_label.clone(),
		}
	}

	/// The engine connection, or a configuration error when none is set up
	pub fn engine_connection(&self) -> Result<&EngineConnectionConfig, Error> {
		if self.engine.is_configured() {
			Ok(&self.engine)
		} else {
			Err(Error::Configuration(
				"no engine connection configured (set REWIND_ENGINE__HOST)".to_string(),
			))
		}
	}
}

/// The subset of configuration the snapshot components need
#[derive(Debug, Clone)]
pub struct SnapshotSettings {
	pub snapshot_base_path: String,
	pub max_snapshots_per_group: usize,
	pub automatic_checkpoint_label: String,
}

impl Default for SnapshotSettings {
	fn default() -> Self {
		RewindConfig::default().snapshot_settings()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = RewindConfig::default();
		assert_eq!(config.max_snapshots_per_group, 9);
		assert!(config.startup_sweep);
		assert!(!config.engine.is_configured());
	}

	#[test]
	fn test_missing_engine_is_configuration_error() {
		let config = RewindConfig::default();
		assert!(matches!(
			config.engine_connection(),
			Err(Error::Configuration(_))
		));

		let mut config = RewindConfig::default();
		config.engine.host = "db.internal".to_string();
		assert_eq!(config.engine_connection().unwrap().port, 1433);
	}
}
