//! # Sync State
//!
//! Status snapshots published by the sync engine and the events emitted
//! while draining.

use crate::client::offline::classifier::ClassifiedError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived sync status, never stored
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub pending_operations_count: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
}

/// Outcome of one drain cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResult {
    pub attempted: usize,
    pub succeeded: usize,
    /// Failed this cycle and kept for a later attempt
    pub failed: usize,
    /// Failed terminally and removed from the queue
    pub abandoned: usize,
    /// The trigger was ignored: offline, or a drain was already running
    pub skipped: bool,
}

impl SyncResult {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Per-operation and per-cycle notifications
#[derive(Debug, Clone)]
pub enum SyncEvent {
    OperationSucceeded {
        operation_id: String,
    },
    OperationFailed {
        operation_id: String,
        retry_count: u32,
        error: String,
    },
    /// Terminal failure; the operation left the queue
    OperationAbandoned(ClassifiedError),
    DrainFinished(SyncResult),
}
