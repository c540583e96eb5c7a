//! # Network Monitor
//!
//! Tracks network reachability and quality, and tells subscribers when the
//! state changes.
//!
//! ## Features
//!
//! - **Connectivity Detection**: Link-level reports plus active reachability probes
//! - **Network Quality**: Round-trip time classified as fast or slow
//! - **Real-time Updates**: Listeners fire on every state transition, in detection order
//! - **Background Probing**: Periodic probes on the tokio runtime, never blocking callers
//!
//! ## State Machine
//!
//! ```text
//! Unknown ──► Online(Fast | Slow)
//!    │            ▲   │
//!    ▼            │   ▼
//!    └────────► Offline
//! ```

use crate::client::subscription::Subscription;
use crate::shared::error::RemoteError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Link technology reported by the platform
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    None,
    Unknown,
}

/// Round-trip quality of the last successful probe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LatencyClass {
    Fast,
    Slow,
    Unknown,
}

/// Coarse connectivity state derived from [`NetworkState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Unknown,
    Online(LatencyClass),
    Offline,
}

/// Current network state; recomputed on every event, never persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkState {
    pub is_connected: bool,
    /// `None` until a probe has confirmed or refuted reachability
    pub is_internet_reachable: Option<bool>,
    pub connection_type: ConnectionType,
    pub latency_class: LatencyClass,
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            is_connected: false,
            is_internet_reachable: None,
            connection_type: ConnectionType::Unknown,
            latency_class: LatencyClass::Unknown,
        }
    }
}

impl NetworkState {
    /// Link is up and the internet was confirmed reachable
    pub fn is_online(&self) -> bool {
        self.is_connected && self.is_internet_reachable == Some(true)
    }

    pub fn connectivity(&self) -> ConnectivityState {
        match (self.is_connected, self.is_internet_reachable) {
            (true, Some(true)) => ConnectivityState::Online(self.latency_class),
            (_, Some(false)) => ConnectivityState::Offline,
            (false, Some(true)) => ConnectivityState::Offline,
            (false, None) if self.connection_type == ConnectionType::None => ConnectivityState::Offline,
            _ => ConnectivityState::Unknown,
        }
    }
}

/// Active reachability check against the remote side
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Returns the measured round trip when the target answered
    async fn probe(&self) -> Result<Duration, RemoteError>;
}

/// Probe that sends a `HEAD` request; any HTTP answer counts as reachable
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self) -> Result<Duration, RemoteError> {
        let started = Instant::now();
        self.client
            .head(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RemoteError::new(format!("network error: {e}")).with_code("unavailable"))?;
        Ok(started.elapsed())
    }
}

type StateListener = Arc<dyn Fn(&NetworkState) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    callbacks: BTreeMap<u64, StateListener>,
}

#[derive(Debug, Default)]
struct MonitorState {
    network: NetworkState,
    last_round_trip: Option<Duration>,
}

/// Maintains the current [`NetworkState`] and notifies listeners on change
pub struct ConnectivityMonitor {
    probe: Arc<dyn ReachabilityProbe>,
    probe_timeout: Duration,
    slow_threshold: Duration,
    state: Mutex<MonitorState>,
    listeners: Arc<Mutex<Listeners>>,
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("probe_timeout", &self.probe_timeout)
            .field("slow_threshold", &self.slow_threshold)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl ConnectivityMonitor {
    pub fn new(probe: Arc<dyn ReachabilityProbe>, probe_timeout: Duration, slow_threshold: Duration) -> Self {
        Self {
            probe,
            probe_timeout,
            slow_threshold,
            state: Mutex::new(MonitorState::default()),
            listeners: Arc::new(Mutex::new(Listeners::default())),
        }
    }

    pub fn current_state(&self) -> NetworkState {
        self.state.lock().network.clone()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.state.lock().network.connectivity()
    }

    pub fn is_online(&self) -> bool {
        self.state.lock().network.is_online()
    }

    /// Last measured round trip exceeded the slow threshold
    pub fn is_slow_connection(&self) -> bool {
        self.state
            .lock()
            .last_round_trip
            .is_some_and(|rtt| rtt > self.slow_threshold)
    }

    /// Probe reachability with a bounded timeout and update the state.
    /// True only when the link is up and the probe answered.
    pub async fn check_connection(&self) -> bool {
        let outcome = tokio::time::timeout(self.probe_timeout, self.probe.probe()).await;

        let round_trip = match outcome {
            Ok(Ok(rtt)) => Some(rtt),
            Ok(Err(error)) => {
                tracing::debug!(error = %error, "Reachability probe failed");
                None
            }
            Err(_) => {
                tracing::debug!(timeout_ms = self.probe_timeout.as_millis() as u64, "Reachability probe timed out");
                None
            }
        };

        let slow_threshold = self.slow_threshold;
        let state = self.update(|state| {
            state.last_round_trip = round_trip.or(state.last_round_trip);
            let network = &mut state.network;
            match round_trip {
                Some(rtt) => {
                    network.is_connected = true;
                    network.is_internet_reachable = Some(true);
                    network.latency_class = if rtt > slow_threshold {
                        LatencyClass::Slow
                    } else {
                        LatencyClass::Fast
                    };
                }
                None => {
                    network.is_internet_reachable = Some(false);
                    network.latency_class = LatencyClass::Unknown;
                }
            }
        });

        state.is_online()
    }

    /// Entry point for platform link callbacks. Going down is final; coming
    /// up leaves reachability unconfirmed until the next probe.
    pub fn report_link_state(&self, is_connected: bool, connection_type: ConnectionType) -> NetworkState {
        self.update(|state| {
            let network = &mut state.network;
            let was_connected = network.is_connected;
            network.is_connected = is_connected;
            network.connection_type = connection_type;

            if !is_connected {
                network.is_internet_reachable = Some(false);
                network.latency_class = LatencyClass::Unknown;
            } else if !was_connected {
                network.is_internet_reachable = None;
            }
        })
    }

    /// Register a listener for state transitions
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&NetworkState) + Send + Sync + 'static,
    {
        let id = {
            let mut listeners = self.listeners.lock();
            listeners.next_id += 1;
            let id = listeners.next_id;
            listeners.callbacks.insert(id, Arc::new(listener));
            id
        };

        let listeners: Weak<Mutex<Listeners>> = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().callbacks.remove(&id);
            }
        })
    }

    /// Probe every `interval` in a background task
    pub fn start_probing(self: &Arc<Self>, interval: Duration) -> ProbingHandle {
        let monitor = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.check_connection().await;
            }
        });

        ProbingHandle { handle }
    }

    fn update(&self, apply: impl FnOnce(&mut MonitorState)) -> NetworkState {
        let (previous, current) = {
            let mut state = self.state.lock();
            let previous = state.network.clone();
            apply(&mut state);
            (previous, state.network.clone())
        };

        if previous != current {
            if previous.connectivity() != current.connectivity() {
                tracing::info!(
                    from = ?previous.connectivity(),
                    to = ?current.connectivity(),
                    connection_type = ?current.connection_type,
                    "Connectivity changed"
                );
            }
            self.notify(&current);
        }
        current
    }

    fn notify(&self, state: &NetworkState) {
        // Cloned out so listeners may subscribe or unsubscribe re-entrantly
        let callbacks: Vec<StateListener> = self.listeners.lock().callbacks.values().cloned().collect();
        for callback in callbacks {
            callback(state);
        }
    }
}

/// Stops background probing when stopped or dropped
#[derive(Debug)]
pub struct ProbingHandle {
    handle: JoinHandle<()>,
}

impl ProbingHandle {
    pub fn stop(self) {}
}

impl Drop for ProbingHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
