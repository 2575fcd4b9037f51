//! Per-backend lifecycle task.
//!
//! One supervisor runs per enabled backend:
//!
//! 1. connect + discover with bounded exponential backoff until Ready
//! 2. while Ready: health probe on an interval and watch the transport
//! 3. on probe failure or transport loss: Degraded, back to 1
//!
//! On shutdown the backend is closed and its catalog entries removed.
//! Nothing here ever blocks a caller-facing call.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use toolgate_application::{
    BackendConnection, CapabilityRegistry, MIN_HEALTH_INTERVAL, RebuildOutcome,
};
use toolgate_domain::{ConnectionState, GatewayError};
use tracing::{debug, info, warn};

use super::connection::RemoteBackend;

pub struct Supervisor {
    backend: Arc<RemoteBackend>,
    registry: Arc<CapabilityRegistry>,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(
        backend: Arc<RemoteBackend>,
        registry: Arc<CapabilityRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            backend,
            registry,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let name = self.backend.name().to_string();
        let backoff = self.backend.params().reconnect_backoff;
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.bring_up().await {
                Ok(()) => {
                    attempt = 0;
                    self.watch().await;
                }
                Err(reason) => {
                    if self.backend.state().is_closed() {
                        break;
                    }
                    let delay = backoff.delay_for(attempt);
                    attempt = attempt.saturating_add(1);
                    let attempts = self.backend.record_reconnect_attempt();
                    warn!(
                        backend = %name,
                        attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %reason,
                        "Backend not available, will retry"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.backend.close();
        if self.registry.remove_backend(&name).is_some() {
            debug!(backend = %name, "Catalog entries removed");
        }
        info!(backend = %name, "Supervisor stopped");
    }

    /// Connect, discover and publish. Ready only after the catalog holds
    /// this backend's capabilities.
    async fn bring_up(&self) -> Result<(), String> {
        let state = tokio::select! {
            _ = self.shutdown.cancelled() => return Err("shutting down".to_string()),
            state = self.backend.connect() => state,
        };
        if state != ConnectionState::Connecting {
            return Err(self
                .backend
                .last_error()
                .unwrap_or_else(|| format!("connect ended in state {}", state)));
        }

        let (seq, set) = self
            .backend
            .discover_sequenced()
            .await
            .map_err(|e| self.discovery_failed(e))?;

        match self.registry.rebuild_if_newer(self.backend.name(), seq, set) {
            Ok(RebuildOutcome::Applied { version }) => {
                debug!(backend = %self.backend.name(), version, "Catalog updated");
            }
            Ok(RebuildOutcome::Stale { current_seq }) => {
                debug!(backend = %self.backend.name(), seq, current_seq, "Discovery superseded");
            }
            Err(e) => return Err(e.to_string()),
        }

        if self.backend.mark_ready() {
            Ok(())
        } else {
            Err("backend closed".to_string())
        }
    }

    fn discovery_failed(&self, error: GatewayError) -> String {
        let message = format!("discovery failed: {}", error);
        let state = self.backend.abandon(&message);
        debug!(backend = %self.backend.name(), state = %state, "Bring-up abandoned");
        message
    }

    /// Probe while Ready. Returns when the backend degrades, leaves Ready
    /// for any other reason, or on shutdown.
    async fn watch(&self) {
        let Some(transport_closed) = self.backend.closed_signal() else {
            return;
        };
        let period = self.backend.params().health_interval.max(MIN_HEALTH_INTERVAL);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = transport_closed.cancelled() => {
                    self.backend.mark_degraded("transport closed");
                    return;
                }
                _ = interval.tick() => {
                    if !self.backend.state().is_ready() {
                        return;
                    }
                    if !self.backend.health_check().await {
                        self.backend.mark_degraded("health probe failed");
                        return;
                    }
                }
            }
        }
    }
}
