//! # Operation Queue
//!
//! Durable queue of mutations not yet confirmed by the remote service.
//! The queue is the single source of truth for work still to be applied
//! remotely; it lives in the local database and survives restarts.
//!
//! ## Features
//!
//! - **Persistent Queue**: Operations survive app restarts
//! - **Enqueue Order**: Drained oldest first, so create/update/delete on one id stay ordered
//! - **Retry Tracking**: `retry_count` grows on failure and never passes `max_retries`
//! - **Paired Writes**: An offline snapshot and its operation are stored and removed together
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fieldsync::client::offline::queue::{OperationQueue, OperationType};
//! use fieldsync::client::local_db::LocalDatabase;
//! use std::sync::Arc;
//!
//! # async fn example() -> fieldsync::shared::Result<()> {
//! let db = Arc::new(LocalDatabase::in_memory().await?);
//! let queue = OperationQueue::load(db, 5).await?;
//!
//! let id = queue
//!     .enqueue(OperationType::Create, "agencies", "0190...", serde_json::Map::new(), None)
//!     .await?;
//!
//! for op in queue.pending_operations().await? {
//!     // Deliver op...
//!     queue.complete(&op).await?;
//! }
//! # Ok(())
//! # }
//! ```

use crate::client::local_db::{LocalDatabase, OfflineRecord};
use crate::shared::entity::{new_id, Document};
use crate::shared::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Mutation kinds that can be queued
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(OperationType::Create),
            "update" => Some(OperationType::Update),
            "delete" => Some(OperationType::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queued mutation with retry metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingOperation {
    /// Stable, client-generated operation id
    pub id: String,
    pub op_type: OperationType,
    pub collection: String,
    pub entity_id: String,
    /// Document to write; for deletes, the snapshot being deleted
    pub payload: Document,
    /// Entity state before an update, when the caller captured it
    pub pre_image: Option<Document>,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Error message from the last failed attempt
    pub last_error: Option<String>,
}

impl PendingOperation {
    pub fn new(
        op_type: OperationType,
        collection: impl Into<String>,
        entity_id: impl Into<String>,
        payload: Document,
        max_retries: u32,
    ) -> Self {
        Self {
            id: new_id(),
            op_type,
            collection: collection.into(),
            entity_id: entity_id.into(),
            payload,
            pre_image: None,
            enqueued_at: Utc::now(),
            retry_count: 0,
            max_retries,
            last_error: None,
        }
    }

    pub fn with_pre_image(mut self, pre_image: Option<Document>) -> Self {
        self.pre_image = pre_image;
        self
    }

    /// Fold a later write to the same entity into this queued operation.
    /// A queued create stays a create and the first pre-image is kept.
    pub fn absorb(mut self, later: &PendingOperation) -> Self {
        if self.op_type != OperationType::Create {
            self.op_type = later.op_type;
        }
        self.payload = later.payload.clone();
        if self.pre_image.is_none() {
            self.pre_image = later.pre_image.clone();
        }
        self
    }

    /// No attempts left
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Durable operation queue for offline mutations
#[derive(Debug)]
pub struct OperationQueue {
    db: Arc<LocalDatabase>,
    max_retries: u32,
    /// Mirror of the table size, updated before any await returns to the caller
    pending: AtomicUsize,
}

impl OperationQueue {
    /// Open the queue over the local database and load the pending count
    pub async fn load(db: Arc<LocalDatabase>, max_retries: u32) -> Result<Self> {
        let count = db.count_operations().await?;
        Ok(Self {
            db,
            max_retries,
            pending: AtomicUsize::new(count),
        })
    }

    pub fn database(&self) -> &Arc<LocalDatabase> {
        &self.db
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Append an operation with `retry_count = 0`; delivery is not attempted
    pub async fn enqueue(
        &self,
        op_type: OperationType,
        collection: &str,
        entity_id: &str,
        payload: Document,
        pre_image: Option<Document>,
    ) -> Result<String> {
        let operation = PendingOperation::new(op_type, collection, entity_id, payload, self.max_retries)
            .with_pre_image(pre_image);
        self.push(operation).await
    }

    /// Append an already-built operation
    pub async fn push(&self, operation: PendingOperation) -> Result<String> {
        self.db.insert_operation(&operation).await?;
        self.pending.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(
            operation_id = %operation.id,
            op_type = %operation.op_type,
            collection = %operation.collection,
            entity_id = %operation.entity_id,
            "Queued operation"
        );
        Ok(operation.id)
    }

    /// Store an offline snapshot and its operation in one transaction.
    /// Returns the queued operation that now carries the write.
    pub async fn enqueue_with_record(&self, record: &OfflineRecord, operation: PendingOperation) -> Result<PendingOperation> {
        let stashed = self.db.stash_offline_write(record, &operation).await?;
        if !stashed.merged {
            self.pending.fetch_add(1, Ordering::SeqCst);
        }

        tracing::info!(
            operation_id = %stashed.operation.id,
            op_type = %stashed.operation.op_type,
            collection = %stashed.operation.collection,
            entity_id = %stashed.operation.entity_id,
            merged = stashed.merged,
            "Stored offline write"
        );
        Ok(stashed.operation)
    }

    /// Pending operations, oldest first
    pub async fn pending_operations(&self) -> Result<Vec<PendingOperation>> {
        self.db.list_operations().await
    }

    pub async fn get(&self, operation_id: &str) -> Result<Option<PendingOperation>> {
        self.db.get_operation(operation_id).await
    }

    /// Remove a delivered operation together with its settled offline record
    pub async fn complete(&self, operation: &PendingOperation) -> Result<()> {
        if self.db.settle_operation(operation).await? {
            self.decrement();
        }
        Ok(())
    }

    /// Count a failed attempt; returns the new retry count
    pub async fn record_failure(&self, operation: &PendingOperation, error: &str) -> Result<u32> {
        let retry_count = (operation.retry_count + 1).min(operation.max_retries);
        self.db.update_operation_retry(&operation.id, retry_count, error).await?;
        Ok(retry_count)
    }

    /// Drop an operation that will not be retried any more
    pub async fn abandon(&self, operation: &PendingOperation) -> Result<()> {
        if self.db.abandon_operation(operation).await? {
            self.decrement();
        }
        Ok(())
    }

    /// Pending operations count, read without touching the database
    pub fn count_pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Re-read the count from the table
    pub async fn refresh_count(&self) -> Result<usize> {
        let count = self.db.count_operations().await?;
        self.pending.store(count, Ordering::SeqCst);
        Ok(count)
    }

    fn decrement(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }
}
