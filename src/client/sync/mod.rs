//! # Background Sync Service
//!
//! Delivers queued mutations to the remote service at least once.
//!
//! ## Architecture
//!
//! The sync service coordinates:
//! - **Operation Queue**: durable pending operations, drained oldest first
//! - **Network Monitor**: drains only while online, and right after reconnecting
//! - **Scheduler**: periodic drain cycles on the tokio runtime
//! - **Failure Classifier**: decides whether a failed operation is kept or abandoned
//!
//! Only one drain cycle runs at a time. A trigger that arrives while a
//! cycle is in flight is ignored and reported as skipped; the next tick or
//! an explicit `force_sync` picks up what is left.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fieldsync::client::sync::SyncService;
//! use std::sync::Arc;
//!
//! # async fn example(service: Arc<SyncService>) -> fieldsync::shared::Result<()> {
//! let auto_sync = service.start_auto_sync();
//!
//! let result = service.force_sync().await?;
//! println!("delivered {} of {}", result.succeeded, result.attempted);
//!
//! let status = service.get_sync_status();
//! println!("{} operations pending", status.pending_operations_count);
//!
//! auto_sync.stop();
//! # Ok(())
//! # }
//! ```

pub mod network_monitor;
pub mod scheduler;
pub mod sync_state;

pub use network_monitor::{
    ConnectionType, ConnectivityMonitor, ConnectivityState, HttpProbe, LatencyClass, NetworkState,
    ProbingHandle, ReachabilityProbe,
};
pub use scheduler::AutoSyncHandle;
pub use sync_state::{SyncEvent, SyncResult, SyncStatus};

use crate::client::local_db::OfflineRecord;
use crate::client::offline::classifier::FailureClassifier;
use crate::client::offline::queue::{OperationQueue, OperationType, PendingOperation};
use crate::client::offline::reconciliation::{reconcile_on_startup, ReconciliationReport};
use crate::client::remote::RemoteService;
use crate::client::subscription::Subscription;
use crate::shared::entity::Document;
use crate::shared::error::{RemoteError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};

const EVENT_CAPACITY: usize = 256;

/// Replay one queued operation against the remote service
pub async fn apply_operation(remote: &dyn RemoteService, operation: &PendingOperation) -> std::result::Result<(), RemoteError> {
    match operation.op_type {
        OperationType::Create => remote.create(&operation.collection, &operation.entity_id, &operation.payload).await,
        OperationType::Update => remote.update(&operation.collection, &operation.entity_id, &operation.payload).await,
        OperationType::Delete => remote.delete(&operation.collection, &operation.entity_id).await,
    }
}

/// How a single operation ended in a drain
enum Delivery {
    Delivered,
    Retrying,
    Abandoned,
}

/// Holds the single-flight flag; cleared on drop
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Main sync service coordinator
pub struct SyncService {
    queue: Arc<OperationQueue>,
    remote: Arc<dyn RemoteService>,
    monitor: Arc<ConnectivityMonitor>,
    classifier: FailureClassifier,
    sync_interval: Duration,
    is_syncing: AtomicBool,
    last_sync_time: Mutex<Option<DateTime<Utc>>>,
    status: watch::Sender<SyncStatus>,
    events: broadcast::Sender<SyncEvent>,
    wake: Arc<Notify>,
    connectivity: Mutex<Option<Subscription>>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("sync_interval", &self.sync_interval)
            .field("status", &self.get_sync_status())
            .finish()
    }
}

impl SyncService {
    /// Wire the engine to its queue, remote service and monitor
    pub async fn new(
        queue: Arc<OperationQueue>,
        remote: Arc<dyn RemoteService>,
        monitor: Arc<ConnectivityMonitor>,
        sync_interval: Duration,
    ) -> Result<Self> {
        let last_sync_time = queue.database().get_last_sync_time().await?;
        let (status, _) = watch::channel(SyncStatus {
            is_syncing: false,
            pending_operations_count: queue.count_pending(),
            last_sync_time,
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let wake = Arc::new(Notify::new());
        let connectivity = {
            let wake = Arc::clone(&wake);
            let was_online = AtomicBool::new(monitor.is_online());
            monitor.subscribe(move |state| {
                let online = state.is_online();
                if online && !was_online.swap(true, Ordering::SeqCst) {
                    wake.notify_one();
                } else if !online {
                    was_online.store(false, Ordering::SeqCst);
                }
            })
        };

        Ok(Self {
            queue,
            remote,
            monitor,
            classifier: FailureClassifier::default(),
            sync_interval,
            is_syncing: AtomicBool::new(false),
            last_sync_time: Mutex::new(last_sync_time),
            status,
            events,
            wake,
            connectivity: Mutex::new(Some(connectivity)),
        })
    }

    pub fn with_classifier(mut self, classifier: FailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    pub fn remote(&self) -> &Arc<dyn RemoteService> {
        &self.remote
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn classifier(&self) -> &FailureClassifier {
        &self.classifier
    }

    /// Append a mutation to the queue; delivery happens on the next drain
    pub async fn queue_operation(
        &self,
        op_type: OperationType,
        collection: &str,
        entity_id: &str,
        payload: Document,
    ) -> Result<String> {
        let id = self.queue.enqueue(op_type, collection, entity_id, payload, None).await?;
        self.publish_status();
        Ok(id)
    }

    /// Append a prepared operation, keeping its id and pre-image
    pub async fn queue_pending(&self, operation: PendingOperation) -> Result<String> {
        let id = self.queue.push(operation).await?;
        self.publish_status();
        Ok(id)
    }

    /// Store an offline snapshot together with the operation that delivers
    /// it; returns the queued operation, which may be an earlier one for the
    /// same entity
    pub async fn queue_offline_write(&self, record: &OfflineRecord, operation: PendingOperation) -> Result<PendingOperation> {
        let queued = self.queue.enqueue_with_record(record, operation).await?;
        self.publish_status();
        Ok(queued)
    }

    /// Re-enqueue orphaned offline records left by an interrupted run
    pub async fn reconcile_on_startup(&self) -> Result<ReconciliationReport> {
        let report = reconcile_on_startup(&self.queue).await?;
        self.publish_status();
        Ok(report)
    }

    /// Drain every sync interval and whenever connectivity is restored
    pub fn start_auto_sync(self: &Arc<Self>) -> AutoSyncHandle {
        scheduler::spawn_auto_sync(Arc::clone(self), self.sync_interval, Arc::clone(&self.wake))
    }

    /// Run one drain cycle now and wait for it
    pub async fn force_sync(&self) -> Result<SyncResult> {
        let result = self.exclusive(self.drain_queue()).await?;
        if !result.skipped {
            let _ = self.events.send(SyncEvent::DrainFinished(result.clone()));
        }
        Ok(result)
    }

    /// Probe connectivity, then drain if the probe succeeded
    pub async fn retry_connection(&self) -> Result<SyncResult> {
        if self.monitor.check_connection().await {
            self.force_sync().await
        } else {
            tracing::info!("Still offline after connection retry");
            Ok(SyncResult::skipped())
        }
    }

    /// Replay a single queued operation outside the bulk drain
    pub async fn retry_operation(&self, operation_id: &str) -> Result<SyncResult> {
        self.exclusive(async {
            let mut result = SyncResult::default();
            let Some(operation) = self.queue.get(operation_id).await? else {
                return Ok(result);
            };

            result.attempted = 1;
            match self.process(&operation).await? {
                Delivery::Delivered => result.succeeded = 1,
                Delivery::Retrying => result.failed = 1,
                Delivery::Abandoned => result.abandoned = 1,
            }
            Ok(result)
        })
        .await
    }

    pub fn get_sync_status(&self) -> SyncStatus {
        SyncStatus {
            is_syncing: self.is_syncing.load(Ordering::SeqCst),
            pending_operations_count: self.queue.count_pending(),
            last_sync_time: *self.last_sync_time.lock(),
        }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Stop reacting to connectivity changes
    pub fn detach(&self) {
        if let Some(subscription) = self.connectivity.lock().take() {
            subscription.unsubscribe();
        }
    }

    fn publish_status(&self) {
        self.status.send_replace(self.get_sync_status());
    }

    /// Run `work` under the single-flight guard, only while online
    async fn exclusive<F>(&self, work: F) -> Result<SyncResult>
    where
        F: Future<Output = Result<SyncResult>>,
    {
        if !self.monitor.is_online() {
            tracing::debug!("Offline, skipping sync");
            return Ok(SyncResult::skipped());
        }
        let Some(guard) = DrainGuard::acquire(&self.is_syncing) else {
            tracing::debug!("Sync already in progress, skipping");
            return Ok(SyncResult::skipped());
        };

        self.publish_status();
        let outcome = work.await;
        drop(guard);
        self.publish_status();
        outcome
    }

    async fn drain_queue(&self) -> Result<SyncResult> {
        let operations = self.queue.pending_operations().await?;
        let mut result = SyncResult::default();

        if !operations.is_empty() {
            tracing::info!(count = operations.len(), "Draining pending operations");
        }

        for operation in &operations {
            result.attempted += 1;
            match self.process(operation).await {
                Ok(Delivery::Delivered) => result.succeeded += 1,
                Ok(Delivery::Retrying) => result.failed += 1,
                Ok(Delivery::Abandoned) => result.abandoned += 1,
                Err(error) => {
                    tracing::error!(operation_id = %operation.id, error = %error, "Local store failed during drain");
                    result.failed += 1;
                }
            }
            self.publish_status();
        }

        let now = Utc::now();
        self.queue.database().set_last_sync_time(now).await?;
        *self.last_sync_time.lock() = Some(now);

        tracing::info!(
            attempted = result.attempted,
            succeeded = result.succeeded,
            failed = result.failed,
            abandoned = result.abandoned,
            "Drain finished"
        );
        Ok(result)
    }

    async fn process(&self, operation: &PendingOperation) -> Result<Delivery> {
        match apply_operation(self.remote.as_ref(), operation).await {
            Ok(()) => {
                self.queue.complete(operation).await?;
                tracing::debug!(operation_id = %operation.id, op_type = %operation.op_type, "Operation delivered");
                let _ = self.events.send(SyncEvent::OperationSucceeded {
                    operation_id: operation.id.clone(),
                });
                Ok(Delivery::Delivered)
            }
            Err(error) => self.handle_failure(operation, error).await,
        }
    }

    async fn handle_failure(&self, operation: &PendingOperation, error: RemoteError) -> Result<Delivery> {
        let message = error.to_string();
        let code = self.classifier.classify_remote(&error);
        let mut failed = operation.clone();
        failed.last_error = Some(message.clone());

        if code.can_retry() {
            failed.retry_count = self.queue.record_failure(operation, &message).await?;
            if !failed.is_exhausted() {
                tracing::warn!(
                    operation_id = %operation.id,
                    code = %code,
                    retry_count = failed.retry_count,
                    max_retries = failed.max_retries,
                    error = %message,
                    "Operation failed, will retry"
                );
                let _ = self.events.send(SyncEvent::OperationFailed {
                    operation_id: operation.id.clone(),
                    retry_count: failed.retry_count,
                    error: message,
                });
                return Ok(Delivery::Retrying);
            }
        }

        self.queue.abandon(operation).await?;
        let classified = FailureClassifier::decide(code, message, &failed);
        tracing::error!(
            operation_id = %operation.id,
            op_type = %operation.op_type,
            entity_id = %operation.entity_id,
            code = %classified.code,
            retry_count = failed.retry_count,
            error = %classified.message,
            "Operation abandoned"
        );
        let _ = self.events.send(SyncEvent::OperationAbandoned(classified));
        Ok(Delivery::Abandoned)
    }
}
