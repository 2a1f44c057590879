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

use rewind_sdk::{HistoryEntry, OperationResult, OperationType};
use tracing::warn;
use uuid::Uuid;

use crate::{clock::Clock, metadata::MetadataStore};

/// Append an audit entry
///
/// Audit writes never fail the operation they describe; a failed write is
/// logged and dropped.
pub fn record_history(
	store: &dyn MetadataStore,
	clock: &dyn Clock,
	operation: OperationType,
	details: serde_json::Value,
	results: Vec<OperationResult>,
) {
	let entry = HistoryEntry {
		id: Uuid::new_v4().to_string(),
		operation,
		timestamp: clock.now(),
		details,
		results,
	};

	if let Err(e) = store.add_history_entry(&entry) {
		warn!(
			target: "audit",
			operation = ?operation,
			error = %e,
			"Failed to record history entry"
		);
	}
}
