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

//! Integration tests for orphan sweeps, deletion and invalid-snapshot cleanup

mod common;

use std::{sync::Arc, time::Duration};

use common::{GROUP_ID, Harness};
use rewind_core::{
	CleanupAuthorization, Error, FixedClock, JsonFileMetadataStore, MemoryEngine, MetadataStore,
	SnapshotService, SnapshotSettings, ValidationError,
	engine::{EngineOp, EngineGateway},
};
use rewind_sdk::{DatabaseGroup, OperationType};

#[tokio::test]
async fn test_sweep_drops_only_authorized_orphans() {
	let h = Harness::billing();
	let kept = h.checkpoint("kept").await;
	h.engine.add_external_snapshot("manual_orders", "orders");
	h.engine.add_external_snapshot("manual_ledger", "ledger");

	let report = h
		.service
		.cleanup_orphaned(&CleanupAuthorization::Names(vec![
			"manual_orders".to_string(),
			format!("{}_orders", kept),
		]))
		.await
		.unwrap();

	assert_eq!(report.dropped, vec!["manual_orders".to_string()]);
	assert_eq!(report.skipped, vec!["manual_ledger".to_string()]);
	assert!(h.engine.snapshot_names().contains(&format!("{}_orders", kept)));
	assert!(h.engine.snapshot_names().contains(&"manual_ledger".to_string()));
}

#[tokio::test]
async fn test_sweep_is_idempotent() {
	let h = Harness::billing();
	h.checkpoint("kept").await;
	h.engine.add_external_snapshot("manual_orders", "orders");

	let first = h
		.service
		.cleanup_orphaned(&CleanupAuthorization::All)
		.await
		.unwrap();
	assert_eq!(first.dropped_count(), 1);

	let second = h
		.service
		.cleanup_orphaned(&CleanupAuthorization::All)
		.await
		.unwrap();
	assert_eq!(second.dropped_count(), 0);
	assert!(second.failed.is_empty());
	assert!(second.report.verified);
	assert_eq!(h.snapshot_count(), 1);

	let sweeps = h
		.store
		.history()
		.unwrap()
		.into_iter()
		.filter(|e| e.operation == OperationType::CleanupOrphans)
		.count();
	assert_eq!(sweeps, 1);
}

#[tokio::test]
async fn test_sweep_reports_failed_drops() {
	let h = Harness::billing();
	h.engine.add_external_snapshot("manual_orders", "orders");
	h.engine.fail_on(EngineOp::DropDatabase, "manual_orders");

	let report = h
		.service
		.cleanup_orphaned(&CleanupAuthorization::All)
		.await
		.unwrap();
	assert!(report.dropped.is_empty());
	assert_eq!(report.failed.len(), 1);
	assert_eq!(report.failed[0].name, "manual_orders");
}

#[tokio::test]
async fn test_startup_sweep_drops_recognized_remnants() {
	let h = Harness::billing();
	h.engine.add_external_snapshot("billing_0123abcd_orders", "orders");
	h.engine.add_external_snapshot("billing_0123abcd_payroll", "orders");
	h.engine.add_external_snapshot("billing_nothex00_orders", "orders");
	h.engine.add_external_snapshot("manual_orders", "orders");

	let report = h.service.startup_sweep().await.unwrap();

	assert_eq!(report.dropped, vec!["billing_0123abcd_orders".to_string()]);
	assert_eq!(report.skipped.len(), 3);
	let remaining = h.engine.snapshot_names();
	assert!(remaining.contains(&"manual_orders".to_string()));
	assert!(remaining.contains(&"billing_0123abcd_payroll".to_string()));

	let again = h.service.startup_sweep().await.unwrap();
	assert_eq!(again.dropped_count(), 0);
}

#[tokio::test]
async fn test_delete_snapshot() {
	let h = Harness::billing();
	let first = h.checkpoint("first").await;
	let second = h.checkpoint("second").await;

	let report = h.service.delete_snapshot(&first).await.unwrap();

	assert_eq!(report.dropped.len(), 2);
	assert!(report.failed.is_empty());
	assert!(h.store.get_snapshot(&first).unwrap().is_none());
	assert!(h.store.get_snapshot(&second).unwrap().is_some());
	assert!(
		!h.engine
			.snapshot_names()
			.iter()
			.any(|name| name.starts_with(first.as_str()))
	);
	assert!(h.service.verify().await.unwrap().verified);

	assert!(matches!(
		h.service.delete_snapshot(&first).await.unwrap_err(),
		Error::Validation(ValidationError::SnapshotNotFound(_))
	));
}

#[tokio::test]
async fn test_delete_tolerates_drop_failures() {
	let h = Harness::billing();
	let target = h.checkpoint("target").await;
	h.engine
		.fail_on(EngineOp::DropDatabase, &format!("{}_ledger", target));

	let report = h.service.delete_snapshot(&target).await.unwrap();
	assert_eq!(report.dropped, vec![format!("{}_orders", target)]);
	assert_eq!(report.failed.len(), 1);
	assert!(h.store.get_snapshot(&target).unwrap().is_none());

	// The survivor is now an orphan an operator can sweep
	let verify = h.service.verify().await.unwrap();
	assert_eq!(verify.orphaned_in_engine, vec![format!("{}_ledger", target)]);
}

#[tokio::test]
async fn test_cleanup_invalid() {
	let h = Harness::billing();
	let complete = h.checkpoint("complete").await;
	h.engine.fail_on(EngineOp::ListDataFiles, "ledger");
	let half = h
		.service
		.create_snapshot(GROUP_ID, Some("half"))
		.await
		.unwrap()
		.snapshot
		.id;
	h.engine.clear_failures();

	assert!(matches!(
		h.service.cleanup_invalid(&complete).await.unwrap_err(),
		Error::Validation(ValidationError::SnapshotNotInvalid(_))
	));

	let report = h.service.cleanup_invalid(&half).await.unwrap();
	assert_eq!(report.dropped, vec![format!("{}_orders", half)]);
	assert!(report.failed.is_empty());
	assert!(h.store.get_snapshot(&half).unwrap().is_none());
	assert!(h.service.verify().await.unwrap().verified);
}

#[tokio::test]
async fn test_mutations_wait_for_group_lock() {
	let h = Arc::new(Harness::billing());
	let guard = h.service.locks().acquire(GROUP_ID).await;

	let task = {
		let h = h.clone();
		tokio::spawn(async move { h.service.create_snapshot(GROUP_ID, Some("queued")).await })
	};
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert!(!task.is_finished());
	assert_eq!(h.snapshot_count(), 0);

	drop(guard);
	let outcome = task.await.unwrap().unwrap();
	assert_eq!(outcome.snapshot.sequence, 1);
}

#[tokio::test]
async fn test_json_store_end_to_end() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("metadata.json");

	let engine = Arc::new(MemoryEngine::new());
	engine.add_database("orders", "v1");
	let clock = Arc::new(FixedClock::new(chrono::Utc::now()));

	let store = Arc::new(JsonFileMetadataStore::open(&path, 100).unwrap());
	store
		.add_group(DatabaseGroup::new("g1", "Shop", vec!["orders".to_string()]))
		.unwrap();
	let service = SnapshotService::new(
		engine.clone(),
		store,
		clock.clone(),
		SnapshotSettings::default(),
	);
	let id = service
		.create_snapshot("g1", Some("before migration"))
		.await
		.unwrap()
		.snapshot
		.id;
	assert!(id.starts_with("shop_"));

	let reopened = JsonFileMetadataStore::open(&path, 100).unwrap();
	let snapshot = reopened.get_snapshot(&id).unwrap().unwrap();
	assert_eq!(snapshot.display_name, "before migration");
	assert_eq!(reopened.history().unwrap().len(), 1);
	assert!(engine.snapshot_exists(&format!("{}_orders", id)).await.unwrap());
}
