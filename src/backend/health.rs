//! Backend connection health monitoring
//!
//! Owns the process-wide tri-state connection indicator. The state is fed by
//! an immediate low-timeout probe at startup, a periodic background ping, and
//! opportunistic observations reported by callers of the transport. OFFLINE
//! is a normal operating state, not a fault; probe failures are never
//! escalated.

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::compatibility::CompatibilityChecker;
use crate::errors::TransportError;

use super::transport::{BackendEndpoint, BackendTransport, JsonRpcResponse};

/// Timeout for the one-shot probe performed by `start`, shorter than the
/// regular call timeout.
const INITIAL_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unknown,
    Online,
    Offline,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Online => 1,
            Self::Offline => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Online,
            2 => Self::Offline,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// Tri-state connection monitor. Construction is pure; `start` performs the
/// immediate probe and spawns the periodic task. All state reads are snapshot
/// reads of a single atomic; updates are last-writer-wins.
pub struct HealthMonitor {
    transport: Arc<dyn BackendTransport>,
    checker: Arc<CompatibilityChecker>,
    probe_interval: Duration,
    state: AtomicU8,
    last_known_good_ms: AtomicI64,
    probe_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl HealthMonitor {
    pub fn new(
        transport: Arc<dyn BackendTransport>,
        checker: Arc<CompatibilityChecker>,
        endpoint: &BackendEndpoint,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            transport,
            checker,
            probe_interval: endpoint.probe_interval,
            state: AtomicU8::new(ConnectionState::Unknown.as_u8()),
            last_known_good_ms: AtomicI64::new(0),
            probe_task: Mutex::new(None),
            shutdown_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn last_known_good(&self) -> Option<DateTime<Utc>> {
        let millis = self.last_known_good_ms.load(Ordering::SeqCst);
        if millis == 0 {
            return None;
        }
        Utc.timestamp_millis_opt(millis).single()
    }

    /// Probe the backend once and begin periodic probing. Idempotent: a
    /// second call while the probe task is alive is a no-op, so callers may
    /// invoke this lazily on every dispatch.
    pub async fn start(self: &Arc<Self>) {
        let mut slot = self.probe_task.lock().await;
        if slot.is_some() {
            return;
        }

        self.initial_probe().await;

        // Subscribe before spawning so a shutdown signal sent immediately
        // after start cannot be missed by the probe task.
        let shutdown = self.shutdown_tx.subscribe();
        let monitor = Arc::clone(self);
        *slot = Some(tokio::spawn(
            async move { monitor.probe_loop(shutdown).await },
        ));
        debug!("started background health probe");
    }

    /// A responding-but-erroring backend is still reachable, so any reply at
    /// all counts as online here; only connect/timeout failures mean offline.
    async fn initial_probe(&self) {
        let outcome = self
            .transport
            .send_with_timeout("tools/list", json!({}), INITIAL_PROBE_TIMEOUT)
            .await;
        match outcome {
            Ok(_) => {
                info!("backend connection verified on startup");
                self.mark_online();
            }
            Err(err) if err.is_transient() => {
                debug!(error = %err, "backend appears offline on startup");
                self.mark_offline();
            }
            Err(err) => {
                debug!(error = %err, "backend responded abnormally on startup, treating as online");
                self.mark_online();
            }
        }
    }

    async fn probe_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.probe_interval) => {
                    match self.transport.send("ping", json!({})).await {
                        Ok(JsonRpcResponse::Result(_)) => self.mark_online(),
                        Ok(JsonRpcResponse::Error { .. }) => self.mark_offline(),
                        Err(err) => {
                            debug!(error = %err, "health probe failed");
                            self.mark_offline();
                        }
                    }
                }
            }
        }
    }

    /// Record a success. A transition into online fires the compatibility
    /// checker exactly once, fire-and-forget.
    pub fn mark_online(&self) {
        self.last_known_good_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        let previous = ConnectionState::from_u8(
            self.state
                .swap(ConnectionState::Online.as_u8(), Ordering::SeqCst),
        );
        if previous != ConnectionState::Online {
            info!("backend connection established");
            self.checker.spawn_check();
        }
    }

    pub fn mark_offline(&self) {
        let previous = ConnectionState::from_u8(
            self.state
                .swap(ConnectionState::Offline.as_u8(), Ordering::SeqCst),
        );
        if previous == ConnectionState::Online {
            warn!("backend connection lost");
        }
    }

    /// Opportunistic observation from a forwarded call, so the state does not
    /// lag behind real traffic by a full probe interval.
    pub fn observe(&self, outcome: &Result<JsonRpcResponse, TransportError>) {
        match outcome {
            Ok(_) => self.mark_online(),
            Err(_) => self.mark_offline(),
        }
    }

    /// Cancel the periodic probe and await its completion. Safe to call when
    /// the probe never started.
    pub async fn shutdown(&self) {
        let task = self.probe_task.lock().await.take();
        if let Some(task) = task {
            let _ = self.shutdown_tx.send(true);
            if let Err(err) = task.await {
                debug!(error = %err, "health probe task ended abnormally");
            }
            info!("health probe stopped");
        }
    }
}
