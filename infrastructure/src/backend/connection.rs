//! Remote backend connection.
//!
//! [`RemoteBackend`] implements the [`BackendConnection`] port over a
//! JSON-RPC [`RpcClient`]. It owns the connection state machine:
//!
//! ```text
//! Disconnected ─connect()─▶ Connecting ─mark_ready()─▶ Ready
//!       ▲                        │                       │
//!       └──── handshake fails ───┘        probe fails /  │
//!                                         transport lost ▼
//!                 Connecting ◀──── reconnect ────── Degraded
//!
//!                    close() from any state ─▶ Closed (terminal)
//! ```
//!
//! New calls are accepted only while Ready. Calls already in flight keep
//! their own handle on the transport and finish or time out independently
//! of later state changes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use toolgate_application::{BackendConnection, BackendStatus, ChunkSender, ConnectionParams};
use toolgate_domain::{
    AtomicConnectionState, BackendConfig, CapabilitySet, ConnectionState, ExecutionErrorKind,
    GatewayError, RenderedPrompt, ResourceContent,
};
use tracing::{debug, info, warn};

use super::client::RpcClient;
use super::stream;
use crate::rpc::error::TransportError;
use crate::rpc::protocol::{
    InitializeParams, InitializeResult, PROTOCOL_VERSION, PromptGetParams, PromptsListResult,
    ResourceReadParams, ResourcesListResult, ToolCallParams, ToolCallResult, ToolsListResult,
    codes, methods,
};

/// Client name sent during the handshake.
const CLIENT_NAME: &str = "toolgate";

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One logical connection to one configured backend.
pub struct RemoteBackend {
    config: BackendConfig,
    params: ConnectionParams,
    state: AtomicConnectionState,
    /// Whether the backend has ever been Ready (failed reconnects then
    /// report Degraded rather than Disconnected).
    was_ready: AtomicBool,
    client: std::sync::RwLock<Option<Arc<RpcClient>>>,
    permits: Semaphore,
    in_flight: AtomicUsize,
    reconnect_attempts: AtomicU32,
    last_error: std::sync::Mutex<Option<String>>,
    discovery_seq: AtomicU64,
    tool_count: AtomicUsize,
    resource_count: AtomicUsize,
    prompt_count: AtomicUsize,
}

impl RemoteBackend {
    pub fn new(config: BackendConfig, params: ConnectionParams) -> Self {
        let permits = Semaphore::new(params.max_in_flight.max(1));
        Self {
            config,
            params,
            state: AtomicConnectionState::new(ConnectionState::Disconnected),
            was_ready: AtomicBool::new(false),
            client: std::sync::RwLock::new(None),
            permits,
            in_flight: AtomicUsize::new(0),
            reconnect_attempts: AtomicU32::new(0),
            last_error: std::sync::Mutex::new(None),
            discovery_seq: AtomicU64::new(0),
            tool_count: AtomicUsize::new(0),
            resource_count: AtomicUsize::new(0),
            prompt_count: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    // ==================== State transitions ====================

    /// Discovery succeeded and the catalog holds this backend's entries.
    pub fn mark_ready(&self) -> bool {
        if self.state.transition(ConnectionState::Ready).is_none() {
            return false;
        }
        self.was_ready.store(true, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        info!(backend = %self.config.name, "Backend ready");
        true
    }

    /// Stop accepting new calls after a failed probe or lost transport.
    pub fn mark_degraded(&self, reason: &str) {
        self.record_error(reason);
        if self.state.load().is_ready()
            && self.state.transition(ConnectionState::Degraded).is_some()
        {
            warn!(backend = %self.config.name, reason = %reason, "Backend degraded");
        }
    }

    /// Degrade only if `client` is still the installed transport. A call
    /// that outlived a reconnect must not take down its successor.
    fn degrade_from(&self, client: &Arc<RpcClient>, reason: &str) {
        let current = self
            .current_client()
            .is_some_and(|installed| Arc::ptr_eq(&installed, client));
        if current {
            self.mark_degraded(reason);
        } else {
            debug!(
                backend = %self.config.name,
                reason = %reason,
                "Ignoring failure on a replaced transport"
            );
        }
    }

    /// Bring-up failed after the handshake. Releases the half-open
    /// transport and settles in Disconnected, or Degraded once the backend
    /// has been Ready before.
    pub fn abandon(&self, reason: &str) -> ConnectionState {
        let client = self
            .client
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(client) = client {
            client.close();
        }
        let state = self.settle_after_failure();
        self.record_error(reason);
        state
    }

    fn settle_after_failure(&self) -> ConnectionState {
        let next = if self.was_ready.load(Ordering::SeqCst) {
            ConnectionState::Degraded
        } else {
            ConnectionState::Disconnected
        };
        self.state.transition(next);
        self.state.load()
    }

    pub fn record_reconnect_attempt(&self) -> u32 {
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Terminal shutdown. In-flight calls fail with BackendDisconnected.
    pub fn close(&self) {
        self.state.swap(ConnectionState::Closed);
        let client = self
            .client
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(client) = client {
            client.close();
        }
        info!(backend = %self.config.name, "Backend closed");
    }

    /// Token that fires when the current transport is lost.
    pub fn closed_signal(&self) -> Option<CancellationToken> {
        self.current_client().map(|c| c.closed())
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record_error(&self, message: &str) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.to_string());
    }

    fn current_client(&self) -> Option<Arc<RpcClient>> {
        self.client
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ==================== Connect & discover ====================

    /// Open the transport and complete the `initialize` handshake.
    async fn establish(&self) -> Result<Arc<RpcClient>, TransportError> {
        let deadline = Instant::now() + self.params.connect_timeout;
        let stream = stream::open(&self.config, self.params.connect_timeout).await?;
        let client = RpcClient::start(&self.config.name, stream);

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_name: CLIENT_NAME.to_string(),
            params: self.config.params.clone(),
        };
        let result = client
            .request(
                methods::INITIALIZE,
                Some(serde_json::to_value(params)?),
                deadline,
                None,
            )
            .await?;
        let init: InitializeResult = serde_json::from_value(result)?;

        if init.protocol_version != PROTOCOL_VERSION {
            warn!(
                backend = %self.config.name,
                server_protocol = %init.protocol_version,
                "Protocol version mismatch, continuing"
            );
        }
        info!(
            backend = %self.config.name,
            server = %init.server_name,
            version = %init.server_version,
            "Handshake complete"
        );
        Ok(client)
    }

    /// Run discovery, returning the result stamped with a sequence number
    /// taken when discovery started.
    pub async fn discover_sequenced(&self) -> Result<(u64, CapabilitySet), GatewayError> {
        let seq = self.discovery_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let client = self.current_client().ok_or_else(|| self.unavailable())?;
        let started = Instant::now();
        let deadline = started + self.params.discovery_timeout;

        let (tools, resources, prompts) = tokio::try_join!(
            self.list::<ToolsListResult>(&client, methods::TOOLS_LIST, deadline, started, false),
            self.list::<ResourcesListResult>(&client, methods::RESOURCES_LIST, deadline, started, true),
            self.list::<PromptsListResult>(&client, methods::PROMPTS_LIST, deadline, started, true),
        )?;

        let set = CapabilitySet {
            tools: tools.tools,
            resources: resources.resources,
            prompts: prompts.prompts,
        }
        .with_backend(&self.config.name);

        self.tool_count.store(set.tools.len(), Ordering::SeqCst);
        self.resource_count.store(set.resources.len(), Ordering::SeqCst);
        self.prompt_count.store(set.prompts.len(), Ordering::SeqCst);

        debug!(
            backend = %self.config.name,
            seq,
            tools = set.tools.len(),
            resources = set.resources.len(),
            prompts = set.prompts.len(),
            "Discovery complete"
        );
        Ok((seq, set))
    }

    async fn list<T: DeserializeOwned + Default>(
        &self,
        client: &Arc<RpcClient>,
        method: &'static str,
        deadline: Instant,
        started: Instant,
        optional: bool,
    ) -> Result<T, GatewayError> {
        match client.request(method, None, deadline, None).await {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| self.internal(format!("malformed {} result: {}", method, e))),
            Err(TransportError::Rpc(e)) if optional && e.code == codes::METHOD_NOT_FOUND => {
                Ok(T::default())
            }
            Err(e) => Err(self.translate(e, client, method, started)),
        }
    }

    // ==================== Calls ====================

    /// Forward one request, bounded by the in-flight limit and `deadline`.
    async fn call(
        &self,
        method: &'static str,
        params: Value,
        target: &str,
        deadline: Instant,
        chunks: Option<ChunkSender>,
    ) -> Result<Value, GatewayError> {
        let state = self.state.load();
        if !state.is_ready() {
            return Err(self.unavailable());
        }
        let client = self.current_client().ok_or_else(|| self.unavailable())?;

        let started = Instant::now();
        let _permit = match tokio::time::timeout_at(deadline, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(self.unavailable()),
            Err(_) => return Err(self.timeout(target, started)),
        };
        let _in_flight = InFlight::enter(&self.in_flight);

        client
            .request(method, Some(params), deadline, chunks)
            .await
            .map_err(|e| self.translate(e, &client, target, started))
    }

    fn translate(
        &self,
        error: TransportError,
        client: &Arc<RpcClient>,
        target: &str,
        started: Instant,
    ) -> GatewayError {
        match error {
            TransportError::Rpc(rpc) => GatewayError::from_execution(
                &self.config.name,
                &format!("{}.{}", self.config.name, target),
                rpc.to_execution(),
            ),
            TransportError::Timeout => self.timeout(target, started),
            e if e.is_disconnect() => {
                let message = e.to_string();
                self.degrade_from(client, &message);
                GatewayError::BackendDisconnected {
                    backend: self.config.name.clone(),
                    message,
                }
            }
            other => self.internal(other.to_string()),
        }
    }

    fn unavailable(&self) -> GatewayError {
        GatewayError::BackendUnavailable {
            backend: self.config.name.clone(),
            state: self.state.load(),
        }
    }

    fn timeout(&self, target: &str, started: Instant) -> GatewayError {
        GatewayError::Timeout {
            backend: self.config.name.clone(),
            target: target.to_string(),
            after: started.elapsed(),
        }
    }

    fn internal(&self, message: String) -> GatewayError {
        GatewayError::Execution {
            backend: self.config.name.clone(),
            kind: ExecutionErrorKind::Internal,
            message,
        }
    }
}

#[async_trait]
impl BackendConnection for RemoteBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn state(&self) -> ConnectionState {
        self.state.load()
    }

    async fn connect(&self) -> ConnectionState {
        if self.state.transition(ConnectionState::Connecting).is_none() {
            return ConnectionState::Closed;
        }

        match self.establish().await {
            Ok(client) => {
                *self.client.write().unwrap_or_else(|e| e.into_inner()) = Some(client);
                self.state.load()
            }
            Err(e) => {
                self.record_error(&format!("connect failed: {}", e));
                let state = self.settle_after_failure();
                debug!(backend = %self.config.name, error = %e, state = %state, "Connect failed");
                state
            }
        }
    }

    async fn discover(&self) -> Result<CapabilitySet, GatewayError> {
        self.discover_sequenced().await.map(|(_, set)| set)
    }

    async fn invoke(
        &self,
        tool: &str,
        arguments: Value,
        deadline: Instant,
        chunks: Option<ChunkSender>,
    ) -> Result<Value, GatewayError> {
        let streaming = chunks.is_some();
        let params = serde_json::to_value(ToolCallParams {
            name: tool.to_string(),
            arguments,
            stream: streaming,
        })
        .map_err(|e| self.internal(e.to_string()))?;

        let mut attempt = 0;
        loop {
            let result = self
                .call(methods::TOOLS_CALL, params.clone(), tool, deadline, chunks.clone())
                .await;

            match result {
                Ok(value) => {
                    return serde_json::from_value::<ToolCallResult>(value)
                        .map(|r| r.content)
                        .map_err(|e| self.internal(format!("malformed tools/call result: {}", e)));
                }
                // Streamed chunks may already have been delivered; never replay.
                Err(error)
                    if !streaming && error.is_retryable() && attempt < self.params.max_retries =>
                {
                    let delay = self.params.retry_backoff.delay_for(attempt);
                    if Instant::now() + delay >= deadline {
                        return Err(error);
                    }
                    attempt += 1;
                    debug!(
                        backend = %self.config.name,
                        tool = %tool,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn fetch_resource(
        &self,
        uri: &str,
        deadline: Instant,
    ) -> Result<ResourceContent, GatewayError> {
        let params = serde_json::to_value(ResourceReadParams {
            uri: uri.to_string(),
        })
        .map_err(|e| self.internal(e.to_string()))?;
        let value = self
            .call(methods::RESOURCES_READ, params, uri, deadline, None)
            .await?;
        let mut content: ResourceContent = serde_json::from_value(value)
            .map_err(|e| self.internal(format!("malformed resources/read result: {}", e)))?;
        content.backend = self.config.name.clone();
        Ok(content)
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Value,
        deadline: Instant,
    ) -> Result<RenderedPrompt, GatewayError> {
        let params = serde_json::to_value(PromptGetParams {
            name: name.to_string(),
            arguments,
        })
        .map_err(|e| self.internal(e.to_string()))?;
        let value = self
            .call(methods::PROMPTS_GET, params, name, deadline, None)
            .await?;
        let mut rendered: RenderedPrompt = serde_json::from_value(value)
            .map_err(|e| self.internal(format!("malformed prompts/get result: {}", e)))?;
        rendered.backend = self.config.name.clone();
        Ok(rendered)
    }

    async fn health_check(&self) -> bool {
        let Some(client) = self.current_client() else {
            return false;
        };
        let deadline = Instant::now() + self.params.health_timeout;
        match client.request(methods::PING, None, deadline, None).await {
            Ok(_) => true,
            Err(e) => {
                debug!(backend = %self.config.name, error = %e, "Health probe failed");
                self.record_error(&format!("health probe failed: {}", e));
                false
            }
        }
    }

    fn status(&self) -> BackendStatus {
        BackendStatus {
            name: self.config.name.clone(),
            state: self.state.load(),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
            last_error: self.last_error(),
            tools: self.tool_count.load(Ordering::SeqCst),
            resources: self.resource_count.load(Ordering::SeqCst),
            prompts: self.prompt_count.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{BackendServer, ToolExecutor, ToolHandler, tool_fn};
    use serde_json::json;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::task::AbortHandle;
    use toolgate_domain::{BackoffPolicy, ErrorKind, ExecutionError, ToolDescriptor};

    /// Per-tool attempt counters for the test backend.
    #[derive(Default)]
    struct Attempts {
        gated: AtomicUsize,
        flaky: AtomicUsize,
        broken: AtomicUsize,
        denied: AtomicUsize,
        locked: AtomicUsize,
    }

    /// Handler that bumps `counter` and answers with `outcome(attempt)`.
    fn counting<F>(
        counter: impl Fn() -> usize + Send + Sync + 'static,
        outcome: F,
    ) -> Arc<dyn ToolHandler>
    where
        F: Fn(usize) -> Result<Value, ExecutionError> + Send + Sync + 'static,
    {
        let outcome = Arc::new(outcome);
        tool_fn(move |_, _| {
            let attempt = counter();
            let outcome = Arc::clone(&outcome);
            async move { outcome(attempt) }
        })
    }

    fn k8s_executor(attempts: Arc<Attempts>, gate: Arc<Semaphore>) -> ToolExecutor {
        let schema = json!({"type": "object"});
        let mut executor = ToolExecutor::new("k8s");
        executor
            .register_tool(
                ToolDescriptor::new("", "hang", schema.clone()),
                tool_fn(|_, _| async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Value::Null)
                }),
            )
            .unwrap();

        let counter = Arc::clone(&attempts);
        executor
            .register_tool(
                ToolDescriptor::new("", "gated", schema.clone()),
                tool_fn(move |_, _| {
                    counter.gated.fetch_add(1, Ordering::SeqCst);
                    let gate = Arc::clone(&gate);
                    async move {
                        let _permit = gate.acquire().await;
                        Ok(json!("opened"))
                    }
                }),
            )
            .unwrap();

        let a = Arc::clone(&attempts);
        executor
            .register_tool(
                ToolDescriptor::new("", "flaky", schema.clone()),
                counting(
                    move || a.flaky.fetch_add(1, Ordering::SeqCst) + 1,
                    |attempt| {
                        if attempt <= 2 {
                            Err(ExecutionError::rate_limited("slow down"))
                        } else {
                            Ok(json!({"attempt": attempt}))
                        }
                    },
                ),
            )
            .unwrap();

        let a = Arc::clone(&attempts);
        executor
            .register_tool(
                ToolDescriptor::new("", "broken", schema.clone()),
                counting(
                    move || a.broken.fetch_add(1, Ordering::SeqCst) + 1,
                    |_| Err(ExecutionError::internal("database unreachable")),
                ),
            )
            .unwrap();

        let a = Arc::clone(&attempts);
        executor
            .register_tool(
                ToolDescriptor::new("", "denied", schema.clone()),
                counting(
                    move || a.denied.fetch_add(1, Ordering::SeqCst) + 1,
                    |_| Err(ExecutionError::auth_failure("token expired")),
                ),
            )
            .unwrap();

        let a = Arc::clone(&attempts);
        executor
            .register_tool(
                ToolDescriptor::new("", "locked", schema),
                counting(
                    move || a.locked.fetch_add(1, Ordering::SeqCst) + 1,
                    |_| Err(ExecutionError::conflict("rollout in progress")),
                ),
            )
            .unwrap();
        executor
    }

    /// Serves every accepted connection in its own task and hands back one
    /// abort handle per connection, so a single transport can be cut.
    async fn serve_each(
        server: Arc<BackendServer>,
    ) -> (BackendConfig, mpsc::UnboundedReceiver<AbortHandle>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let server = Arc::clone(&server);
                let (reader, writer) = stream.into_split();
                let task = tokio::spawn(async move {
                    let _ = server.serve(reader, writer).await;
                });
                if tx.send(task.abort_handle()).is_err() {
                    break;
                }
            }
        });
        (BackendConfig::new("k8s", addr.to_string()).unwrap(), rx)
    }

    struct Harness {
        backend: Arc<RemoteBackend>,
        attempts: Arc<Attempts>,
        gate: Arc<Semaphore>,
        connections: mpsc::UnboundedReceiver<AbortHandle>,
    }

    async fn harness(params: ConnectionParams) -> Harness {
        let attempts = Arc::new(Attempts::default());
        let gate = Arc::new(Semaphore::new(0));
        let server = Arc::new(BackendServer::new(k8s_executor(
            Arc::clone(&attempts),
            Arc::clone(&gate),
        )));
        let (config, connections) = serve_each(server).await;
        let backend = Arc::new(RemoteBackend::new(config, params));
        bring_up(&backend).await;
        Harness {
            backend,
            attempts,
            gate,
            connections,
        }
    }

    async fn bring_up(backend: &RemoteBackend) {
        assert_eq!(backend.connect().await, ConnectionState::Connecting);
        backend.discover().await.unwrap();
        assert!(backend.mark_ready());
    }

    fn fast_retries() -> ConnectionParams {
        params()
            .with_max_retries(2)
            .with_retry_backoff(BackoffPolicy::new(
                Duration::from_millis(5),
                2.0,
                Duration::from_millis(20),
            ))
    }

    fn in_secs(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    fn unreachable_config() -> BackendConfig {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        BackendConfig::new("ci", addr.to_string()).unwrap()
    }

    fn params() -> ConnectionParams {
        ConnectionParams::default().with_connect_timeout(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_never_connected_rejects_calls() {
        let backend = RemoteBackend::new(unreachable_config(), params());
        assert_eq!(backend.state(), ConnectionState::Disconnected);

        let err = backend
            .invoke("list_jobs", json!({}), Instant::now() + Duration::from_secs(5), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    }

    #[tokio::test]
    async fn test_failed_connect_stays_disconnected() {
        let backend = RemoteBackend::new(unreachable_config(), params());
        let state = backend.connect().await;
        assert_eq!(state, ConnectionState::Disconnected);

        let status = backend.status();
        assert!(status.last_error.unwrap().contains("connect failed"));
        assert!(!backend.health_check().await);
    }

    #[tokio::test]
    async fn test_closed_is_terminal() {
        let backend = RemoteBackend::new(unreachable_config(), params());
        backend.close();
        assert_eq!(backend.connect().await, ConnectionState::Closed);
        assert!(!backend.mark_ready());
        assert_eq!(backend.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_discover_without_transport_is_unavailable() {
        let backend = RemoteBackend::new(unreachable_config(), params());
        let err = backend.discover().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    }
    #[tokio::test]
    async fn test_stale_transport_failure_leaves_new_transport_ready() {
        let mut h = harness(params()).await;
        let first = h.connections.recv().await.unwrap();

        let backend = Arc::clone(&h.backend);
        let in_flight =
            tokio::spawn(async move { backend.invoke("hang", json!({}), in_secs(30), None).await });
        while h.backend.status().in_flight == 0 {
            tokio::task::yield_now().await;
        }

        // Probe failure, then a successful reconnect on a second transport.
        h.backend.mark_degraded("health probe failed");
        bring_up(&h.backend).await;
        let _second = h.connections.recv().await.unwrap();

        first.abort();
        let err = in_flight.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendDisconnected);

        assert_eq!(h.backend.state(), ConnectionState::Ready);
        assert!(h.backend.health_check().await);
        let health = h
            .backend
            .invoke("health_check", json!({}), in_secs(5), None)
            .await
            .unwrap();
        assert_eq!(health["backend"], "k8s");
    }

    #[tokio::test]
    async fn test_lost_current_transport_degrades() {
        let mut h = harness(params()).await;
        let only = h.connections.recv().await.unwrap();

        let backend = Arc::clone(&h.backend);
        let in_flight =
            tokio::spawn(async move { backend.invoke("hang", json!({}), in_secs(30), None).await });
        while h.backend.status().in_flight == 0 {
            tokio::task::yield_now().await;
        }

        only.abort();
        let err = in_flight.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendDisconnected);
        assert_eq!(h.backend.state(), ConnectionState::Degraded);
    }

    #[tokio::test]
    async fn test_abandon_releases_transport_and_settles_state() {
        let h = harness(params()).await;

        // Once Ready, a failed bring-up reports Degraded.
        assert_eq!(h.backend.connect().await, ConnectionState::Connecting);
        let half_open = h.backend.closed_signal().unwrap();
        assert_eq!(h.backend.abandon("discovery failed: boom"), ConnectionState::Degraded);
        assert!(half_open.is_cancelled());
        assert!(h.backend.closed_signal().is_none());
        assert_eq!(h.backend.last_error().as_deref(), Some("discovery failed: boom"));

        let fresh = RemoteBackend::new(unreachable_config(), params());
        assert_eq!(fresh.abandon("discovery failed"), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_calls_above_in_flight_bound_queue() {
        let h = harness(params().with_max_in_flight(1)).await;

        let backend = Arc::clone(&h.backend);
        let first =
            tokio::spawn(async move { backend.invoke("gated", json!({}), in_secs(10), None).await });
        while h.attempts.gated.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // No slot frees up before this deadline.
        let err = h
            .backend
            .invoke("gated", json!({}), Instant::now() + Duration::from_millis(100), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(h.attempts.gated.load(Ordering::SeqCst), 1);

        // A queued call proceeds once the slot is released.
        let backend = Arc::clone(&h.backend);
        let queued =
            tokio::spawn(async move { backend.invoke("gated", json!({}), in_secs(10), None).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.attempts.gated.load(Ordering::SeqCst), 1);
        assert_eq!(h.backend.status().in_flight, 1);

        h.gate.add_permits(2);
        assert_eq!(first.await.unwrap().unwrap(), json!("opened"));
        assert_eq!(queued.await.unwrap().unwrap(), json!("opened"));
        assert_eq!(h.attempts.gated.load(Ordering::SeqCst), 2);
        assert_eq!(h.backend.status().in_flight, 0);
    }

    #[tokio::test]
    async fn test_retry_safe_errors_are_retried() {
        let h = harness(fast_retries()).await;

        let out = h.backend.invoke("flaky", json!({}), in_secs(5), None).await.unwrap();
        assert_eq!(out, json!({"attempt": 3}));
        assert_eq!(h.attempts.flaky.load(Ordering::SeqCst), 3);

        let err = h
            .backend
            .invoke("broken", json!({}), in_secs(5), None)
            .await
            .unwrap_err();
        assert_eq!(err.execution_kind(), Some(ExecutionErrorKind::Internal));
        assert_eq!(h.attempts.broken.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_errors_fail_on_first_attempt() {
        let h = harness(fast_retries()).await;

        let err = h
            .backend
            .invoke("denied", json!({}), in_secs(5), None)
            .await
            .unwrap_err();
        assert_eq!(err.execution_kind(), Some(ExecutionErrorKind::AuthFailure));
        assert_eq!(h.attempts.denied.load(Ordering::SeqCst), 1);

        let err = h
            .backend
            .invoke("locked", json!({}), in_secs(5), None)
            .await
            .unwrap_err();
        assert_eq!(err.execution_kind(), Some(ExecutionErrorKind::Conflict));
        assert_eq!(h.attempts.locked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_streaming_calls_are_never_retried() {
        let h = harness(fast_retries()).await;

        let (chunks, _rx) = mpsc::unbounded_channel();
        let err = h
            .backend
            .invoke("flaky", json!({}), in_secs(5), Some(chunks))
            .await
            .unwrap_err();
        assert_eq!(err.execution_kind(), Some(ExecutionErrorKind::RateLimited));
        assert_eq!(h.attempts.flaky.load(Ordering::SeqCst), 1);
    }
}
