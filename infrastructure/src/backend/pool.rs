//! The set of backend connections a gateway runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use toolgate_application::{
    BackendConnection, BackendStatus, CapabilityRegistry, ConnectionParams, RebuildOutcome,
};
use toolgate_domain::{BackendConfig, ConnectionState, ExecutionErrorKind, GatewayError};
use tracing::{debug, info};

use super::connection::RemoteBackend;
use super::supervisor::Supervisor;

/// Interval between readiness checks in [`BackendPool::wait_ready`].
const READY_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Owns one [`RemoteBackend`] and one supervisor task per enabled backend.
pub struct BackendPool {
    registry: Arc<CapabilityRegistry>,
    backends: Vec<Arc<RemoteBackend>>,
    shutdown: CancellationToken,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl BackendPool {
    /// Build connections for the enabled entries of `configs`, keeping
    /// configuration order.
    pub fn new(configs: &[BackendConfig], params: ConnectionParams) -> Self {
        let backends: Vec<Arc<RemoteBackend>> = configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| Arc::new(RemoteBackend::new(c.clone(), params.clone())))
            .collect();

        let skipped = configs.len() - backends.len();
        if skipped > 0 {
            debug!(skipped, "Disabled backends not started");
        }

        let order = backends.iter().map(|b| b.name().to_string()).collect();
        Self {
            registry: Arc::new(CapabilityRegistry::new(order)),
            backends,
            shutdown: CancellationToken::new(),
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> Arc<CapabilityRegistry> {
        Arc::clone(&self.registry)
    }

    /// Connections as the dispatcher port, in configuration order.
    pub fn connections(&self) -> Vec<Arc<dyn BackendConnection>> {
        self.backends
            .iter()
            .map(|b| Arc::clone(b) as Arc<dyn BackendConnection>)
            .collect()
    }

    pub fn backend(&self, name: &str) -> Option<&Arc<RemoteBackend>> {
        self.backends.iter().find(|b| b.name() == name)
    }

    /// Start one supervisor per backend. Returns immediately.
    pub fn start(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        if !handles.is_empty() {
            return;
        }
        for backend in &self.backends {
            let supervisor = Supervisor::new(
                Arc::clone(backend),
                Arc::clone(&self.registry),
                self.shutdown.child_token(),
            );
            handles.push(supervisor.spawn());
        }
        info!(backends = self.backends.len(), "Backend supervisors started");
    }

    /// Wait until every backend is Ready or `timeout` elapses. Returns the
    /// number of Ready backends; never waits longer than `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let ready = self.ready_count();
            if ready == self.backends.len() || tokio::time::Instant::now() >= deadline {
                return ready;
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    pub fn ready_count(&self) -> usize {
        self.backends
            .iter()
            .filter(|b| b.state().is_ready())
            .count()
    }

    /// Re-run discovery for one Ready backend.
    pub async fn refresh(&self, name: &str) -> Result<RebuildOutcome, GatewayError> {
        let backend = self
            .backend(name)
            .ok_or_else(|| GatewayError::BackendUnavailable {
                backend: name.to_string(),
                state: ConnectionState::Closed,
            })?;
        let state = backend.state();
        if !state.is_ready() {
            return Err(GatewayError::BackendUnavailable {
                backend: name.to_string(),
                state,
            });
        }
        let (seq, set) = backend.discover_sequenced().await?;
        self.registry
            .rebuild_if_newer(name, seq, set)
            .map_err(|e| GatewayError::Execution {
                backend: name.to_string(),
                kind: ExecutionErrorKind::Internal,
                message: e.to_string(),
            })
    }

    pub fn status(&self) -> Vec<BackendStatus> {
        self.backends.iter().map(|b| b.status()).collect()
    }

    /// Stop every supervisor and close every connection.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        futures::future::join_all(handles).await;
        for backend in &self.backends {
            backend.close();
        }
    }
}

impl Drop for BackendPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
