//! # Sync Scheduler
//!
//! Background loop that drains the queue on a fixed interval and right away
//! whenever connectivity comes back.
//!
//! Stopping cancels the timer only. A drain already in flight runs to the
//! end so no operation is left half-applied.

use crate::client::sync::SyncService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to a running auto-sync loop; stops the loop when stopped or dropped
#[derive(Debug)]
pub struct AutoSyncHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl AutoSyncHandle {
    /// Stop scheduling new drains
    pub fn stop(self) {}

    /// Stop and wait for an in-flight drain to finish
    pub async fn stop_and_wait(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for AutoSyncHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

pub(crate) fn spawn_auto_sync(service: Arc<SyncService>, interval: Duration, wake: Arc<Notify>) -> AutoSyncHandle {
    let (shutdown, mut stopped) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = interval.as_secs_f64(), "Auto sync started");

        loop {
            tokio::select! {
                biased;
                changed = stopped.changed() => {
                    if changed.is_err() || *stopped.borrow() {
                        break;
                    }
                    continue;
                }
                _ = wake.notified() => {
                    tracing::debug!("Connectivity restored, draining queue");
                }
                _ = ticker.tick() => {}
            }

            if let Err(error) = service.force_sync().await {
                tracing::error!(error = %error, "Sync cycle failed");
            }
        }

        tracing::info!("Auto sync stopped");
    });

    AutoSyncHandle {
        shutdown,
        task: Some(task),
    }
}
