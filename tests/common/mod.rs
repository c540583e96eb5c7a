//! Common test utilities and helpers
//!
//! - `FakeRemote`: in-memory document service with failure injection
//! - `SwitchProbe`: reachability probe toggled by the test
//! - `Harness`: a fully wired subsystem over an in-memory or file database

pub mod fake_remote;

pub use fake_remote::FakeRemote;

use async_trait::async_trait;
use fieldsync::client::local_db::LocalDatabase;
use fieldsync::client::offline::{BackoffStrategy, OperationQueue, RecoveryController};
use fieldsync::client::resilient::ResilientService;
use fieldsync::client::sync::{ConnectivityMonitor, ReachabilityProbe, SyncService};
use fieldsync::shared::{Entity, RemoteError};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Probe answering according to a switch
#[derive(Debug, Default)]
pub struct SwitchProbe {
    reachable: AtomicBool,
}

impl SwitchProbe {
    pub fn set(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReachabilityProbe for SwitchProbe {
    async fn probe(&self) -> Result<Duration, RemoteError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(Duration::from_millis(5))
        } else {
            Err(RemoteError::new("network unreachable"))
        }
    }
}

/// Network failure the fake remote raises while "offline"
pub fn offline_error() -> RemoteError {
    RemoteError::new("Network request failed").with_code("unavailable")
}

pub struct Harness {
    pub db: Arc<LocalDatabase>,
    pub remote: Arc<FakeRemote>,
    pub probe: Arc<SwitchProbe>,
    pub monitor: Arc<ConnectivityMonitor>,
    pub sync: Arc<SyncService>,
    pub recovery: Arc<RecoveryController>,
}

impl Harness {
    pub async fn new() -> Self {
        let db = Arc::new(LocalDatabase::in_memory().await.unwrap());
        Self::with_db(db, 3, Arc::new(FakeRemote::new())).await
    }

    pub async fn with_db(db: Arc<LocalDatabase>, max_retries: u32, remote: Arc<FakeRemote>) -> Self {
        let queue = Arc::new(OperationQueue::load(db.clone(), max_retries).await.unwrap());
        let probe = Arc::new(SwitchProbe::default());
        let monitor = Arc::new(ConnectivityMonitor::new(
            probe.clone(),
            Duration::from_millis(200),
            Duration::from_millis(1500),
        ));
        let sync = Arc::new(
            SyncService::new(queue, remote.clone(), monitor.clone(), Duration::from_secs(3600))
                .await
                .unwrap(),
        );
        let recovery = Arc::new(RecoveryController::new(sync.clone(), BackoffStrategy::default()));

        Self {
            db,
            remote,
            probe,
            monitor,
            sync,
            recovery,
        }
    }

    pub fn service<E: Entity>(&self) -> ResilientService<E> {
        ResilientService::new(self.sync.clone(), self.recovery.clone())
    }

    /// Remote reachable and the monitor confirmed online
    pub async fn go_online(&self) {
        self.remote.recover();
        self.probe.set(true);
        assert!(self.monitor.check_connection().await);
    }

    /// Remote unreachable and the monitor confirmed offline
    pub async fn go_offline(&self) {
        self.remote.fail_with(offline_error());
        self.probe.set(false);
        assert!(!self.monitor.check_connection().await);
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
