//! Client Module
//!
//! The offline-resilience and synchronization subsystem.
//!
//! # Components (bottom-up)
//!
//! - **`sync::network_monitor`** - connectivity state and change notifications
//! - **`local_db`** - SQLite-backed durable store for snapshots and the queue
//! - **`offline`** - operation queue, failure classification, rollback, retries
//! - **`sync`** - drain engine with single-flight execution and auto sync
//! - **`resilient`** - try-remote / fall-back-local façade, one per entity type
//! - **`remote`** - the remote document service boundary and its HTTP client
//!
//! Everything is constructed explicitly and wired once at process start;
//! there is no global state.

/// Runtime configuration
pub mod config;

/// Domain entity types and their façades
pub mod entities;

/// Local durable store
pub mod local_db;

/// Offline queue, classification and recovery
pub mod offline;

/// Remote document service boundary
pub mod remote;

/// Resilient service façade
pub mod resilient;

/// Subscription handles
pub mod subscription;

/// Sync engine and connectivity monitoring
pub mod sync;

pub use config::Config;
pub use resilient::ResilientService;
pub use subscription::Subscription;
