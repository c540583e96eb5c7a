//! # Offline Operation Handling
//!
//! Keeps writes working while the remote service is unreachable: durable
//! queuing, failure classification, rollback and delayed retries.
//!
//! ## Key Components
//!
//! - `queue.rs`: Durable pending operation queue
//! - `retry.rs`: Backoff strategies and delayed single-operation retries
//! - `classifier.rs`: Failure taxonomy and retry/rollback policy
//! - `recovery.rs`: Rollback actions and retry scheduling
//! - `reconciliation.rs`: Startup repair of record/operation pairs

pub mod classifier;
pub mod queue;
pub mod reconciliation;
pub mod recovery;
pub mod retry;

pub use classifier::{ClassifiedError, ErrorCode, FailureClassifier};
pub use queue::{OperationQueue, OperationType, PendingOperation};
pub use reconciliation::{reconcile_on_startup, ReconciliationReport};
pub use recovery::{RecoveryController, RecoveryReport};
pub use retry::{BackoffStrategy, RetryManager};
