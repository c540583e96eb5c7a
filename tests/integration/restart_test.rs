//! Queue and snapshots survive a process restart

use crate::common::{FakeRemote, Harness};
use fieldsync::client::entities::Agency;
use fieldsync::client::local_db::{LocalDatabase, OfflineOperation, OfflineRecord};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_offline_write_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("local.db");
    let remote = Arc::new(FakeRemote::new());

    let id = {
        let db = Arc::new(LocalDatabase::open(&db_path).await.unwrap());
        let h = Harness::with_db(db.clone(), 3, remote.clone()).await;
        h.go_offline().await;
        let id = h.service::<Agency>().upsert(Agency::new("Ridge")).await.unwrap();
        h.recovery.shutdown();
        h.sync.detach();
        db.close().await;
        id
    };

    let db = Arc::new(LocalDatabase::open(&db_path).await.unwrap());
    let h = Harness::with_db(db, 3, remote.clone()).await;
    assert_eq!(h.sync.get_sync_status().pending_operations_count, 1);
    assert!(h.db.get_record("agencies", &id).await.unwrap().unwrap().pending_sync);

    h.go_online().await;
    let result = h.sync.force_sync().await.unwrap();
    assert_eq!(result.succeeded, 1);
    assert!(remote.get("agencies", &id).is_some());
    assert!(h.db.get_record("agencies", &id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_orphaned_record_is_requeued_on_startup() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("local.db");

    {
        let db = LocalDatabase::open(&db_path).await.unwrap();
        let payload = json!({"id": "o1", "name": "Orphan"}).as_object().cloned().unwrap();
        db.put_record(&OfflineRecord::pending("agencies", "o1", payload, OfflineOperation::Create))
            .await
            .unwrap();
        db.close().await;
    }

    let db = Arc::new(LocalDatabase::open(&db_path).await.unwrap());
    let h = Harness::with_db(db, 3, Arc::new(FakeRemote::new())).await;

    let report = h.sync.reconcile_on_startup().await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(h.sync.get_sync_status().pending_operations_count, 1);

    h.go_online().await;
    h.sync.force_sync().await.unwrap();
    assert!(h.remote.get("agencies", "o1").is_some());
    assert!(h.db.get_record("agencies", "o1").await.unwrap().is_none());
}
