//! # Startup Reconciliation
//!
//! Restores the pairing between offline records and queued operations after
//! a restart. A pending-sync snapshot whose operation went missing is
//! re-enqueued rather than discarded, so no accepted write is lost.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fieldsync::client::offline::{reconcile_on_startup, OperationQueue};
//!
//! # async fn example(queue: OperationQueue) -> fieldsync::shared::Result<()> {
//! let report = reconcile_on_startup(&queue).await?;
//! println!("re-enqueued {} orphaned records", report.requeued);
//! # Ok(())
//! # }
//! ```

use crate::client::local_db::OfflineOperation;
use crate::client::offline::queue::{OperationQueue, OperationType, PendingOperation};
use crate::shared::error::Result;
use serde::{Deserialize, Serialize};

/// What startup reconciliation changed
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// Orphaned snapshots given a fresh operation
    pub requeued: usize,
    /// Queue size after reconciliation
    pub pending_operations: usize,
}

/// Re-enqueue orphaned pending-sync records and reload the pending count
pub async fn reconcile_on_startup(queue: &OperationQueue) -> Result<ReconciliationReport> {
    let db = queue.database();
    let orphans = db.orphaned_records().await?;
    let mut report = ReconciliationReport::default();

    for record in orphans {
        let op_type = match record.offline_operation {
            OfflineOperation::Create => OperationType::Create,
            OfflineOperation::Update => OperationType::Update,
        };
        let operation = PendingOperation::new(
            op_type,
            record.collection.as_str(),
            record.entity_id.as_str(),
            record.payload.clone(),
            queue.max_retries(),
        );

        tracing::warn!(
            collection = %record.collection,
            entity_id = %record.entity_id,
            op_type = %op_type,
            "Re-enqueueing offline record with no pending operation"
        );
        db.insert_operation(&operation).await?;
        report.requeued += 1;
    }

    report.pending_operations = queue.refresh_count().await?;
    tracing::info!(
        requeued = report.requeued,
        pending = report.pending_operations,
        "Startup reconciliation finished"
    );
    Ok(report)
}
