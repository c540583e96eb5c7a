//! # Failure Recovery
//!
//! Executes the recovery decided for a classified failure: roll back the
//! speculative local snapshot and schedule a single delayed retry of the
//! operation.
//!
//! Rollback by operation type:
//!
//! - `create`: drop the cached snapshot
//! - `update`: restore the pre-image captured before the write; without one
//!   the rollback is skipped with a warning
//! - `delete`: re-insert the deleted snapshot carried as the payload
//!
//! A failed rollback is logged and swallowed.

use crate::client::local_db::{LocalDatabase, OfflineOperation, OfflineRecord};
use crate::client::offline::classifier::{ClassifiedError, FailureClassifier};
use crate::client::offline::queue::{OperationType, PendingOperation};
use crate::client::offline::retry::{BackoffStrategy, RetryManager};
use crate::client::sync::SyncService;
use crate::shared::error::{Result, SyncError};
use std::sync::Arc;
use std::time::Duration;

/// What [`RecoveryController::handle_error`] did
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryReport {
    pub error: ClassifiedError,
    pub rolled_back: bool,
    /// Delay of the retry that was scheduled, if any
    pub retry_delay: Option<Duration>,
}

/// Undo the local effect of `operation`; returns whether anything was restored or removed
pub async fn rollback(db: &LocalDatabase, operation: &PendingOperation) -> Result<bool> {
    match operation.op_type {
        OperationType::Create => db.remove_record(&operation.collection, &operation.entity_id).await,
        OperationType::Update => match &operation.pre_image {
            Some(pre_image) => {
                let record = OfflineRecord::restored(
                    operation.collection.as_str(),
                    operation.entity_id.as_str(),
                    pre_image.clone(),
                    OfflineOperation::Update,
                );
                db.put_record(&record).await?;
                Ok(true)
            }
            None => {
                tracing::warn!(
                    operation_id = %operation.id,
                    entity_id = %operation.entity_id,
                    "Update rollback skipped: no pre-image captured"
                );
                Ok(false)
            }
        },
        OperationType::Delete => {
            let record = OfflineRecord::restored(
                operation.collection.as_str(),
                operation.entity_id.as_str(),
                operation.payload.clone(),
                OfflineOperation::Create,
            );
            db.put_record(&record).await?;
            Ok(true)
        }
    }
}

/// Classifies failures from the resilient façades and runs their recovery
#[derive(Debug)]
pub struct RecoveryController {
    sync: Arc<SyncService>,
    classifier: FailureClassifier,
    backoff: BackoffStrategy,
    retries: RetryManager,
}

impl RecoveryController {
    pub fn new(sync: Arc<SyncService>, backoff: BackoffStrategy) -> Self {
        Self {
            classifier: sync.classifier().clone(),
            sync,
            backoff,
            retries: RetryManager::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: FailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn classifier(&self) -> &FailureClassifier {
        &self.classifier
    }

    pub fn retries(&self) -> &RetryManager {
        &self.retries
    }

    /// Classify without acting
    pub fn classify(&self, error: &SyncError, operation: &PendingOperation) -> ClassifiedError {
        self.classifier.classify(error, operation)
    }

    /// Classify, roll back if required, and schedule a retry if allowed
    pub async fn handle_error(&self, error: &SyncError, operation: &PendingOperation) -> RecoveryReport {
        let classified = self.classify(error, operation);
        tracing::warn!(
            operation_id = %operation.id,
            op_type = %operation.op_type,
            collection = %operation.collection,
            code = %classified.code,
            can_retry = classified.can_retry,
            should_rollback = classified.should_rollback,
            error = %classified.message,
            "Operation failed"
        );

        let mut rolled_back = false;
        if classified.should_rollback {
            match rollback(self.sync.queue().database(), operation).await {
                Ok(changed) => {
                    rolled_back = changed;
                    tracing::info!(operation_id = %operation.id, changed, "Rolled back local snapshot");
                }
                Err(error) => {
                    tracing::error!(operation_id = %operation.id, error = %error, "Rollback failed");
                }
            }
        }

        let mut retry_delay = None;
        if classified.can_retry && operation.retry_count < operation.max_retries {
            let delay = self.backoff.delay_for(operation.retry_count + 1);
            self.schedule_retry(operation.id.clone(), delay);
            retry_delay = Some(delay);
        }

        RecoveryReport {
            error: classified,
            rolled_back,
            retry_delay,
        }
    }

    fn schedule_retry(&self, operation_id: String, delay: Duration) {
        let sync = Arc::clone(&self.sync);
        let id = operation_id.clone();
        self.retries.schedule(operation_id, delay, move || async move {
            match sync.retry_operation(&id).await {
                Ok(result) if result.skipped => {
                    tracing::debug!(operation_id = %id, "Retry deferred to the next drain");
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::error!(operation_id = %id, error = %error, "Scheduled retry failed");
                }
            }
        });
    }

    /// Cancel every scheduled retry
    pub fn shutdown(&self) {
        self.retries.cancel_all();
    }
}
