//! Resilient façade reads, writes and recovery

use crate::common::{offline_error, Harness};
use fieldsync::client::entities::{Agency, Resource, Services};
use fieldsync::client::local_db::{OfflineOperation, OfflineRecord};
use fieldsync::client::offline::{ErrorCode, OperationType, PendingOperation};
use fieldsync::shared::{Document, RemoteError, SyncError};
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;

fn doc(value: serde_json::Value) -> Document {
    value.as_object().cloned().unwrap()
}

fn names(agencies: &[Agency]) -> Vec<&str> {
    agencies.iter().map(|a| a.name.as_str()).collect()
}

#[tokio::test]
async fn test_merge_rule_remote_wins_on_shared_id() {
    let h = Harness::new().await;
    h.go_online().await;
    h.remote.seed("agencies", json!({"id": "a", "name": "Alpha"}));
    h.remote.seed("agencies", json!({"id": "b", "name": "Bravo"}));
    h.db.put_record(&OfflineRecord::pending("agencies", "b", doc(json!({"id": "b", "name": "Bravo (offline)"})), OfflineOperation::Update))
        .await
        .unwrap();
    h.db.put_record(&OfflineRecord::pending("agencies", "c", doc(json!({"id": "c", "name": "Charlie"})), OfflineOperation::Create))
        .await
        .unwrap();

    let all = h.service::<Agency>().get_all().await.unwrap();
    assert_eq!(names(&all), vec!["Alpha", "Bravo", "Charlie"]);
}

#[tokio::test]
async fn test_get_all_falls_back_to_local_records() {
    let h = Harness::new().await;
    h.remote.seed("agencies", json!({"id": "a", "name": "Alpha"}));
    h.db.put_record(&OfflineRecord::pending("agencies", "c", doc(json!({"id": "c", "name": "Charlie"})), OfflineOperation::Create))
        .await
        .unwrap();
    h.go_offline().await;

    let all = h.service::<Agency>().get_all().await.unwrap();
    assert_eq!(names(&all), vec!["Charlie"]);
}

#[tokio::test]
async fn test_get_by_id_remote_then_local() {
    let h = Harness::new().await;
    h.go_online().await;
    h.remote.seed("agencies", json!({"id": "a", "name": "Alpha"}));
    h.db.put_record(&OfflineRecord::pending("agencies", "c", doc(json!({"id": "c", "name": "Charlie"})), OfflineOperation::Create))
        .await
        .unwrap();
    let agencies = h.service::<Agency>();

    assert_eq!(agencies.get_by_id("a").await.unwrap().unwrap().name, "Alpha");
    assert_eq!(agencies.get_by_id("c").await.unwrap().unwrap().name, "Charlie");
    assert!(agencies.get_by_id("zzz").await.unwrap().is_none());

    h.go_offline().await;
    assert!(agencies.get_by_id("a").await.unwrap().is_none());
    assert_eq!(agencies.get_by_id("c").await.unwrap().unwrap().name, "Charlie");
}

#[tokio::test]
async fn test_permission_denied_is_terminal() {
    let h = Harness::new().await;
    h.go_online().await;
    h.remote.fail_with(RemoteError::new("permission denied"));

    let error = h.service::<Agency>().upsert(Agency::new("North")).await.unwrap_err();
    assert_matches!(error, SyncError::Remote(_));
    assert_eq!(h.sync.queue().count_pending(), 0);
    assert!(h.db.get_all_records("agencies").await.unwrap().is_empty());
    assert_eq!(h.recovery.retries().count_retrying(), 0);

    let op = PendingOperation::new(OperationType::Create, "agencies", "a1", doc(json!({"id": "a1"})), 3);
    let report = h.recovery.handle_error(&SyncError::Remote(RemoteError::new("permission denied")), &op).await;
    assert_eq!(report.error.code, ErrorCode::Permission);
    assert!(!report.error.can_retry);
    assert!(!report.error.should_rollback);
    assert!(!report.rolled_back);
    assert_eq!(report.retry_delay, None);
}

#[tokio::test]
async fn test_server_error_on_create_rolls_back_and_schedules_retry() {
    let h = Harness::new().await;
    h.go_online().await;
    h.remote.fail_with(RemoteError::new("500 internal"));

    let id = h.service::<Agency>().upsert(Agency::new("North")).await.unwrap();
    assert!(h.db.get_record("agencies", &id).await.unwrap().is_none());

    let ops = h.sync.queue().pending_operations().await.unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].entity_id, id);
    assert!(h.recovery.retries().is_scheduled(&ops[0].id));

    let op = PendingOperation::new(OperationType::Create, "agencies", "a2", doc(json!({"id": "a2"})), 3);
    h.db.put_record(&OfflineRecord::pending("agencies", "a2", op.payload.clone(), OfflineOperation::Create))
        .await
        .unwrap();
    let report = h.recovery.handle_error(&SyncError::Remote(RemoteError::new("500 internal")), &op).await;
    assert_eq!(report.error.code, ErrorCode::Server);
    assert!(report.error.can_retry);
    assert!(report.error.should_rollback);
    assert!(report.rolled_back);
    assert!(h.db.get_record("agencies", "a2").await.unwrap().is_none());

    let delay = report.retry_delay.unwrap();
    assert!(delay >= Duration::from_millis(1000) && delay < Duration::from_millis(2000), "{delay:?}");

    h.recovery.shutdown();
}

#[tokio::test]
async fn test_scheduled_retry_delivers_operation() {
    let h = Harness::new().await;
    h.go_online().await;
    h.remote.fail_with(offline_error());

    let id = h.service::<Agency>().upsert(Agency::new("North")).await.unwrap();
    h.remote.recover();

    // First retry lands within [1s, 2s)
    tokio::time::sleep(Duration::from_millis(2300)).await;
    assert!(h.remote.get("agencies", &id).is_some());
    assert_eq!(h.sync.queue().count_pending(), 0);
}

#[tokio::test]
async fn test_natural_key_upsert_updates_existing() {
    let h = Harness::new().await;
    h.go_online().await;
    h.remote.seed("agencies", json!({"id": "n1", "name": "North"}));

    let mut agency = Agency::new("North");
    agency.region = Some("Coast".into());
    let id = h.service::<Agency>().upsert(agency).await.unwrap();

    assert_eq!(id, "n1");
    assert_eq!(h.remote.get("agencies", "n1").unwrap()["region"], "Coast");
    assert_eq!(h.remote.documents("agencies").len(), 1);

    let ops = h.sync.queue().pending_operations().await.unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].op_type, OperationType::Update);
    assert_eq!(ops[0].pre_image, Some(doc(json!({"id": "n1", "name": "North"}))));
}

#[tokio::test]
async fn test_audit_can_be_disabled() {
    let h = Harness::new().await;
    h.go_online().await;
    let services = Services::new(h.sync.clone(), h.recovery.clone(), false);

    services.agencies.upsert(Agency::new("North")).await.unwrap();
    assert_eq!(h.sync.queue().count_pending(), 0);
}

#[tokio::test]
async fn test_failed_update_restores_pre_image_on_database_error() {
    let h = Harness::new().await;
    h.go_online().await;
    h.remote.seed(
        "resources",
        json!({"id": "r1", "name": "Pump", "category": "water", "quantity": 2}),
    );
    h.remote.fail_entity("r1", RemoteError::new("write aborted").with_code("aborted"));

    let resource = Resource {
        id: Some("r1".into()),
        name: "Pump".into(),
        category: "water".into(),
        quantity: 5,
        agency_id: None,
    };
    let id = h.service::<Resource>().upsert(resource).await.unwrap();
    h.recovery.shutdown();

    let record = h.db.get_record("resources", &id).await.unwrap().unwrap();
    assert_eq!(record.payload["quantity"], 2);
    assert!(!record.pending_sync);

    let ops = h.sync.queue().pending_operations().await.unwrap();
    assert_eq!(ops[0].op_type, OperationType::Update);
    assert_eq!(ops[0].payload["quantity"], 5);
}

#[tokio::test]
async fn test_validation_runs_before_any_write() {
    let h = Harness::new().await;
    h.go_online().await;

    let error = h.service::<Agency>().upsert(Agency::new("")).await.unwrap_err();
    assert_matches!(error, SyncError::Validation { .. });
    assert_eq!(h.remote.write_count(), 0);
}

#[tokio::test]
async fn test_offline_remove_is_replayed() {
    let h = Harness::new().await;
    h.remote.seed("agencies", json!({"id": "a", "name": "Alpha"}));
    h.go_offline().await;

    h.service::<Agency>().remove("a").await.unwrap();
    h.recovery.shutdown();

    let ops = h.sync.queue().pending_operations().await.unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].op_type, OperationType::Delete);

    h.go_online().await;
    h.sync.force_sync().await.unwrap();
    assert!(h.remote.get("agencies", "a").is_none());
}

#[tokio::test]
async fn test_subscribe_merges_and_degrades() {
    let h = Harness::new().await;
    h.go_online().await;
    h.remote.seed("agencies", json!({"id": "a", "name": "Alpha"}));
    h.db.put_record(&OfflineRecord::pending("agencies", "c", doc(json!({"id": "c", "name": "Charlie"})), OfflineOperation::Create))
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = h.service::<Agency>().subscribe(move |agencies: Vec<Agency>| {
        let _ = tx.send(agencies.into_iter().map(|a| a.name).collect::<Vec<_>>());
    });

    let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, vec!["Alpha", "Charlie"]);

    h.remote.seed("agencies", json!({"id": "b", "name": "Bravo"}));
    h.remote.fail_with(RemoteError::new("stream reset"));
    h.remote.emit_error(RemoteError::new("stream reset"));

    let degraded = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(degraded, vec!["Charlie"]);

    subscription.unsubscribe();
}

#[tokio::test]
async fn test_online_edit_waits_behind_queued_create() {
    let h = Harness::new().await;
    let agencies = Services::new(h.sync.clone(), h.recovery.clone(), false).agencies;

    h.go_offline().await;
    let id = agencies.upsert(Agency::new("v1")).await.unwrap();
    h.recovery.shutdown();

    h.go_online().await;
    let mut agency = agencies.get_by_id(&id).await.unwrap().unwrap();
    agency.name = "v2".into();
    assert_eq!(agencies.upsert(agency).await.unwrap(), id);

    // Nothing reaches the remote ahead of the queued create
    assert_eq!(h.remote.write_count(), 0);
    let ops = h.sync.queue().pending_operations().await.unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].op_type, OperationType::Create);
    assert_eq!(ops[0].payload["name"], "v2");

    let result = h.sync.force_sync().await.unwrap();
    assert_eq!(result.succeeded, 1);
    assert_eq!(h.remote.get("agencies", &id).unwrap()["name"], "v2");
    assert!(h.db.get_record("agencies", &id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_online_remove_waits_behind_queued_create() {
    let h = Harness::new().await;
    let agencies = Services::new(h.sync.clone(), h.recovery.clone(), false).agencies;

    h.go_offline().await;
    let id = agencies.upsert(Agency::new("Temporary")).await.unwrap();
    h.recovery.shutdown();

    h.go_online().await;
    agencies.remove(&id).await.unwrap();
    assert_eq!(h.remote.write_count(), 0);
    assert!(h.db.get_record("agencies", &id).await.unwrap().is_none());

    let ops: Vec<OperationType> = h
        .sync
        .queue()
        .pending_operations()
        .await
        .unwrap()
        .into_iter()
        .map(|op| op.op_type)
        .collect();
    assert_eq!(ops, vec![OperationType::Create, OperationType::Delete]);

    h.sync.force_sync().await.unwrap();
    assert!(h.remote.get("agencies", &id).is_none());
    assert_eq!(h.sync.queue().count_pending(), 0);
}

#[tokio::test]
async fn test_repeated_offline_edits_keep_one_operation() {
    let h = Harness::new().await;
    let agencies = h.service::<Agency>();

    h.go_offline().await;
    let id = agencies.upsert(Agency::new("Ridge")).await.unwrap();
    let mut agency = agencies.get_by_id(&id).await.unwrap().unwrap();
    agency.region = Some("Highlands".into());
    assert_eq!(agencies.upsert(agency).await.unwrap(), id);
    h.recovery.shutdown();

    let record = h.db.get_record("agencies", &id).await.unwrap().unwrap();
    assert!(record.pending_sync);
    assert_eq!(record.offline_operation, OfflineOperation::Create);

    let ops = h.sync.queue().pending_operations().await.unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].op_type, OperationType::Create);
    assert_eq!(ops[0].payload["region"], "Highlands");
    assert_eq!(h.sync.get_sync_status().pending_operations_count, 1);

    h.go_online().await;
    h.sync.force_sync().await.unwrap();
    assert_eq!(h.remote.get("agencies", &id).unwrap()["region"], "Highlands");
}
