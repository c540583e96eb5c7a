/**
 * FieldSync Agent Entry Point
 *
 * Wires the offline-resilience subsystem at process start: local store,
 * connectivity monitor, sync engine and recovery controller. Reconciles
 * the queue left by the previous run, then probes and drains until
 * interrupted.
 */

use fieldsync::client::local_db::LocalDatabase;
use fieldsync::client::offline::{BackoffStrategy, OperationQueue, RecoveryController};
use fieldsync::client::remote::HttpRemote;
use fieldsync::client::sync::{ConnectivityMonitor, HttpProbe, SyncEvent, SyncService};
use fieldsync::client::Config;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "fieldsync=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        remote_url = config.remote_url(),
        database = %config.database_path().display(),
        "Starting fieldsync agent"
    );

    let db = Arc::new(LocalDatabase::open(config.database_path()).await?);
    let queue = Arc::new(OperationQueue::load(db, config.max_retries()).await?);
    let probe = Arc::new(HttpProbe::new(config.probe_url(), config.probe_timeout()));
    let monitor = Arc::new(ConnectivityMonitor::new(probe, config.probe_timeout(), config.slow_threshold()));
    let remote = Arc::new(HttpRemote::new(config.clone()));

    let sync = Arc::new(SyncService::new(queue, remote, monitor.clone(), config.sync_interval()).await?);
    let recovery = RecoveryController::new(sync.clone(), BackoffStrategy::from_config(config.app()));

    let report = sync.reconcile_on_startup().await?;
    if report.requeued > 0 {
        tracing::warn!(requeued = report.requeued, "Recovered offline writes from previous run");
    }

    monitor.check_connection().await;
    let probing = monitor.start_probing(config.probe_interval());
    let auto_sync = sync.start_auto_sync();

    let mut status = sync.subscribe_status();
    let mut events = sync.subscribe_events();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                tracing::info!(
                    syncing = current.is_syncing,
                    pending = current.pending_operations_count,
                    last_sync = ?current.last_sync_time,
                    "Sync status"
                );
            }
            event = events.recv() => match event {
                Ok(SyncEvent::OperationAbandoned(error)) => {
                    tracing::error!(
                        operation_id = %error.related_operation.id,
                        code = %error.code,
                        "Operation will not be delivered: {}",
                        error.message
                    );
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Dropped sync events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    tracing::info!("Shutting down");
    recovery.shutdown();
    probing.stop();
    auto_sync.stop_and_wait().await;
    sync.detach();
    Ok(())
}
