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

//! Integration tests for verification and self-healing

mod common;

use common::{GROUP_ID, Harness};
use rewind_core::MetadataStore;
use rewind_sdk::OperationType;

#[tokio::test]
async fn test_verify_is_idempotent_when_consistent() {
	let h = Harness::billing();
	h.checkpoint("a").await;
	h.checkpoint("b").await;

	let first = h.service.verify().await.unwrap();
	let second = h.service.verify().await.unwrap();

	assert!(first.verified);
	assert!(second.verified);
	assert!(first.healed_snapshots.is_empty());
	assert!(second.healed_snapshots.is_empty());
	assert!(second.issues.is_empty());
	assert_eq!(h.snapshot_count(), 2);
}

#[tokio::test]
async fn test_self_healing_converges() {
	let h = Harness::billing();
	let keep = h.checkpoint("keep").await;
	let stale = h.checkpoint("stale").await;
	h.engine.drop_out_of_band(&format!("{}_orders", stale));

	let report = h.service.verify().await.unwrap();
	assert!(!report.verified);
	assert_eq!(report.healed_snapshots, vec![stale.clone()]);
	assert!(report.missing_in_engine.is_empty());
	assert!(report.orphaned_in_engine.is_empty());
	assert_eq!(report.issues.len(), 1);
	assert!(report.issues[0].contains(&stale));

	assert!(h.store.get_snapshot(&stale).unwrap().is_none());
	assert!(h.store.get_snapshot(&keep).unwrap().is_some());
	assert!(
		!h.engine
			.snapshot_names()
			.iter()
			.any(|name| name.starts_with(stale.as_str()))
	);

	let again = h.service.verify().await.unwrap();
	assert!(again.verified);
	assert!(!again.missing_in_engine.contains(&format!("{}_orders", stale)));
	assert!(!again.orphaned_in_engine.contains(&format!("{}_ledger", stale)));

	let history = h.store.history().unwrap();
	assert_eq!(
		history
			.iter()
			.filter(|e| e.operation == OperationType::HealStaleMetadata)
			.count(),
		1
	);
}

#[tokio::test]
async fn test_orphans_are_reported_only() {
	let h = Harness::billing();
	h.checkpoint("a").await;
	h.engine.add_external_snapshot("nightly_orders", "orders");
	h.engine.clear_calls();

	let report = h.service.verify().await.unwrap();

	assert!(!report.verified);
	assert_eq!(report.orphaned_in_engine, vec!["nightly_orders".to_string()]);
	assert!(h.engine.mutating_calls().is_empty());
	assert!(h.engine.snapshot_names().contains(&"nightly_orders".to_string()));
}

#[tokio::test]
async fn test_failed_entries_are_not_expected_in_engine() {
	let h = Harness::billing();
	h.engine
		.fail_on(rewind_core::engine::EngineOp::ListDataFiles, "ledger");
	h.service
		.create_snapshot(GROUP_ID, Some("half"))
		.await
		.unwrap();
	h.engine.clear_failures();

	let report = h.service.verify().await.unwrap();
	assert!(report.verified);
	assert_eq!(h.snapshot_count(), 1);
}

#[tokio::test]
async fn test_cleanup_stale_metadata_returns_removed_ids() {
	let h = Harness::billing();
	let gone = h.checkpoint("gone").await;
	h.engine.drop_out_of_band(&format!("{}_orders", gone));
	h.engine.drop_out_of_band(&format!("{}_ledger", gone));

	let removed = h.service.cleanup_stale_metadata().await.unwrap();
	assert_eq!(removed, vec![gone]);
	assert_eq!(h.snapshot_count(), 0);

	assert!(h.service.cleanup_stale_metadata().await.unwrap().is_empty());
}
