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

//! Integration test for the logging setup
//!
//! init_logging installs a global subscriber, so everything lives in one
//! test function.

use std::{fs, thread, time::Duration};

use rewind_core::logging::init_logging;
use tracing::info;

#[test]
fn test_log_file_creation_and_content() {
	let dir = tempfile::tempdir().unwrap();
	unsafe {
		std::env::set_var("LOG_DIR", dir.path());
		std::env::set_var("LOG_TO_CONSOLE", "false");
	}

	init_logging().unwrap();
	info!(target: "creator", snapshot_id = "billing_ab12cd34", "Snapshot created");

	// The writer is non-blocking
	thread::sleep(Duration::from_millis(300));

	let log_dir = dir.path().join("rewind");
	let log_files: Vec<_> = fs::read_dir(&log_dir)
		.unwrap()
		.filter_map(|e| e.ok())
		.filter(|e| e.file_name().to_string_lossy().starts_with("rewind"))
		.collect();
	assert_eq!(log_files.len(), 1);

	let content = fs::read_to_string(log_files[0].path()).unwrap();
	assert!(content.contains("Log directory"));
	assert!(content.contains("billing_ab12cd34"));
	assert!(!content.contains("\u{1b}["));

	assert!(init_logging().is_err());
}
