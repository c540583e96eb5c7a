//! FieldSync - Offline Resilience Library
//!
//! FieldSync keeps the write path of a field-operations client working while
//! its remote document database is unreachable. Writes are accepted
//! optimistically, stored durably on the device, and replayed once
//! connectivity returns; reads merge remote data with records that only
//! exist locally.
//!
//! # Module Structure
//!
//! - **`shared`** - Types shared by every layer
//!   - Error taxonomy, configuration, entity/document contract
//!
//! - **`client`** - The offline-resilience subsystem
//!   - Connectivity monitor and sync engine
//!   - SQLite local store and durable operation queue
//!   - Failure classifier, rollback and retry scheduling
//!   - Resilient service façades per entity type
//!
//! # Guarantees
//!
//! - **At-least-once delivery**: a queued operation leaves the queue only
//!   when the remote service confirmed it or it failed terminally
//! - **Idempotent replay**: entity ids are UUIDv7 generated on the client,
//!   so replaying a create overwrites rather than duplicates
//! - **Ordered drains**: operations replay in enqueue order, one drain at a time
//!
//! # Usage
//!
//! ```rust,no_run
//! use fieldsync::client::entities::{Agency, Services};
//! use fieldsync::client::local_db::LocalDatabase;
//! use fieldsync::client::offline::{BackoffStrategy, OperationQueue, RecoveryController};
//! use fieldsync::client::remote::HttpRemote;
//! use fieldsync::client::sync::{ConnectivityMonitor, HttpProbe, SyncService};
//! use fieldsync::client::Config;
//! use std::sync::Arc;
//!
//! # async fn example() -> fieldsync::shared::Result<()> {
//! let config = Config::from_env()?;
//! let db = Arc::new(LocalDatabase::open(config.database_path()).await?);
//! let queue = Arc::new(OperationQueue::load(db, config.max_retries()).await?);
//! let probe = Arc::new(HttpProbe::new(config.probe_url(), config.probe_timeout()));
//! let monitor = Arc::new(ConnectivityMonitor::new(probe, config.probe_timeout(), config.slow_threshold()));
//! let remote = Arc::new(HttpRemote::new(config.clone()));
//!
//! let sync = Arc::new(SyncService::new(queue, remote, monitor, config.sync_interval()).await?);
//! let recovery = Arc::new(RecoveryController::new(sync.clone(), BackoffStrategy::from_config(config.app())));
//! let services = Services::new(sync.clone(), recovery, config.audit_successful_writes());
//!
//! let id = services.agencies.upsert(Agency::new("North Station")).await?;
//! println!("accepted agency {id}");
//! # Ok(())
//! # }
//! ```

/// Shared types and data structures
pub mod shared;

/// Offline-resilience and synchronization subsystem
pub mod client;
