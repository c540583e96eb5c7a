//! # Retry Logic and Backoff Strategies
//!
//! Exponential backoff with jitter for failed operations, and a small
//! manager that runs delayed single-operation retries on the tokio runtime.
//!
//! ## Features
//!
//! - **Exponential Backoff**: `min(base * 2^(n-1), max)`
//! - **Jitter**: uniform in `[0, max_jitter)`, so queued operations do not retry in lockstep
//! - **Replace on Reschedule**: one pending timer per operation id
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fieldsync::client::offline::retry::{BackoffStrategy, RetryManager};
//!
//! # async fn example() {
//! let backoff = BackoffStrategy::default();
//! let manager = RetryManager::new();
//!
//! let delay = backoff.delay_for(1);
//! manager.schedule("op-id".to_string(), delay, || async {
//!     // replay the operation...
//! });
//! # }
//! ```

use crate::shared::config::AppConfig;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Backoff strategy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Fixed interval between retries
    Fixed {
        interval: Duration,
    },
    /// Exponential backoff with jitter
    Exponential {
        base: Duration,
        max: Duration,
        /// Exclusive upper bound of the added jitter
        max_jitter: Duration,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl BackoffStrategy {
    pub fn from_config(config: &AppConfig) -> Self {
        BackoffStrategy::Exponential {
            base: Duration::from_millis(config.base_delay_ms),
            max: Duration::from_millis(config.max_delay_ms),
            max_jitter: Duration::from_millis(config.max_jitter_ms),
        }
    }

    /// Delay before attempt number `retry_count`, without jitter
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed { interval } => *interval,
            BackoffStrategy::Exponential { base, max, .. } => {
                let exponent = retry_count.saturating_sub(1).min(31);
                base.checked_mul(1u32 << exponent)
                    .map_or(*max, |delay| delay.min(*max))
            }
        }
    }

    /// Delay before attempt number `retry_count`, jitter included
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let delay = self.base_delay(retry_count);
        match self {
            BackoffStrategy::Exponential { max_jitter, .. } if max_jitter.as_micros() > 0 => {
                let bound = u64::try_from(max_jitter.as_micros()).unwrap_or(u64::MAX);
                let jitter_us = rand::thread_rng().gen_range(0..bound);
                delay + Duration::from_micros(jitter_us)
            }
            _ => delay,
        }
    }
}

/// Scheduled retry slot
#[derive(Debug)]
struct ScheduledRetry {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct RetrySlots {
    next_generation: u64,
    scheduled: HashMap<String, ScheduledRetry>,
}

/// Runs delayed retries, at most one pending per operation id
#[derive(Debug, Clone, Default)]
pub struct RetryManager {
    slots: Arc<Mutex<RetrySlots>>,
}

impl RetryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`; replaces any retry already pending for the id
    pub fn schedule<F, Fut>(&self, operation_id: String, delay: Duration, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let slots = Arc::clone(&self.slots);
        // Held across the spawn so the task cannot clear its slot before it is inserted
        let mut guard = self.slots.lock();
        guard.next_generation += 1;
        let generation = guard.next_generation;
        let key = operation_id.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task().await;

            let mut guard = slots.lock();
            if guard.scheduled.get(&key).is_some_and(|s| s.generation == generation) {
                guard.scheduled.remove(&key);
            }
        });

        if let Some(previous) = guard
            .scheduled
            .insert(operation_id.clone(), ScheduledRetry { generation, handle })
        {
            previous.handle.abort();
        }

        tracing::debug!(operation_id = %operation_id, delay_ms = delay.as_millis() as u64, "Scheduled retry");
    }

    /// Cancel retry for an operation
    pub fn cancel(&self, operation_id: &str) -> bool {
        match self.slots.lock().scheduled.remove(operation_id) {
            Some(slot) => {
                slot.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, slot) in self.slots.lock().scheduled.drain() {
            slot.handle.abort();
        }
    }

    pub fn is_scheduled(&self, operation_id: &str) -> bool {
        self.slots.lock().scheduled.contains_key(operation_id)
    }

    /// Count operations currently waiting for a retry
    pub fn count_retrying(&self) -> usize {
        self.slots.lock().scheduled.len()
    }
}
