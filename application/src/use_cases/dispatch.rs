//! Dispatcher: routes agent calls to the backend that owns them.
//!
//! # Flow
//!
//! ```text
//! Invoke(session?, tool, args)
//!   │
//!   ├─ Registry.resolve(tool) ───────────── none ─▶ UnknownTool (no network call)
//!   ├─ validate(args, input_schema) ─────── fail ─▶ InvalidArguments {path, constraint}
//!   ├─ connection.state() == Ready ? ─────── no ──▶ BackendUnavailable (no waiting)
//!   ├─ connection.invoke(.., deadline) ─ elapsed ─▶ Timeout
//!   │                                  ─ error ───▶ ExecutionError / BackendDisconnected
//!   └─ record turn in session (message only on failure, never raw arguments)
//! ```
//!
//! The dispatcher holds no lock across a call; concurrent invocations only
//! contend at each backend connection's own in-flight bound.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use toolgate_domain::util::compact_json;
use toolgate_domain::{
    ArgumentValidator, BasicArgumentValidator, ConnectionState, GatewayError, InvocationEvent,
    InvokeResult, PromptDescriptor, RenderedPrompt, ResourceContent, ResourceDescriptor,
    SchemaViolation, ToolListing, Turn,
};
use tracing::{debug, info, warn};

use crate::config::DispatchParams;
use crate::ports::backend_connection::{BackendConnection, BackendStatus, ChunkSender};
use crate::ports::call_logger::{CallEvent, CallLogger, NoCallLogger};
use crate::ports::session_store::SessionStore;
use crate::registry::CapabilityRegistry;

/// Turn message recorded when a streaming caller goes away mid-call.
pub const CANCELLED_BY_CALLER: &str = "cancelled by caller";

/// A tool invocation request from the agent layer.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub tool: String,
    pub arguments: Value,
    pub timeout: Option<Duration>,
}

impl InvokeRequest {
    pub fn new(tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            session_id: None,
            user_id: None,
            tool: tool.into(),
            arguments,
            timeout: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Compact description for session history: the tool name and the
    /// argument keys, never the values.
    fn describe(&self, resolved: Option<&str>) -> String {
        let keys = self
            .arguments
            .as_object()
            .map(|o| o.keys().map(String::as_str).collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        format!("{}({})", resolved.unwrap_or(&self.tool), keys)
    }
}

/// Agent-facing error object: `{kind, message, ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<SchemaViolation>,
}

impl From<&GatewayError> for ErrorEnvelope {
    fn from(error: &GatewayError) -> Self {
        let violations = match error {
            GatewayError::InvalidArguments { violations, .. } => violations.clone(),
            _ => Vec::new(),
        };
        Self {
            kind: error.kind().as_str(),
            message: error.to_string(),
            sub_kind: error.execution_kind().map(|k| k.as_str()),
            backend: error.backend().map(str::to_string),
            violations,
        }
    }
}

/// Outcome of [`Dispatcher::invoke`], attributed to a session.
///
/// Serializes as `{"session_id", "backend", "tool", "result", "duration_ms"}`
/// or `{"session_id", "error": {"kind", "message", ...}}`.
#[derive(Debug, Clone)]
pub struct InvokeResponse {
    pub session_id: String,
    pub outcome: Result<InvokeResult, GatewayError>,
}

impl InvokeResponse {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum Envelope<'a> {
    Success {
        session_id: &'a str,
        backend: &'a str,
        tool: &'a str,
        result: &'a Value,
        duration_ms: u64,
    },
    Failure {
        session_id: &'a str,
        error: ErrorEnvelope,
    },
}

impl Serialize for InvokeResponse {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let envelope = match &self.outcome {
            Ok(result) => Envelope::Success {
                session_id: &self.session_id,
                backend: &result.backend,
                tool: &result.tool,
                result: &result.content,
                duration_ms: result.duration_ms,
            },
            Err(error) => Envelope::Failure {
                session_id: &self.session_id,
                error: ErrorEnvelope::from(error),
            },
        };
        envelope.serialize(serializer)
    }
}

/// Handle for receiving the events of a streamed invocation.
///
/// Delivers [`InvocationEvent::Chunk`]s in send order followed by exactly
/// one terminal event. Dropping the handle cancels the call.
pub struct InvocationStream {
    pub session_id: String,
    pub receiver: mpsc::Receiver<InvocationEvent>,
}

impl InvocationStream {
    pub async fn recv(&mut self) -> Option<InvocationEvent> {
        self.receiver.recv().await
    }

    /// Consume the stream, returning every chunk and the final outcome.
    pub async fn collect(mut self) -> (Vec<Value>, Result<InvokeResult, GatewayError>) {
        let mut chunks = Vec::new();
        while let Some(event) = self.receiver.recv().await {
            match event {
                InvocationEvent::Chunk(chunk) => chunks.push(chunk),
                InvocationEvent::Completed(result) => return (chunks, Ok(result)),
                InvocationEvent::Failed(error) => return (chunks, Err(error)),
            }
        }
        let error = GatewayError::BackendDisconnected {
            backend: String::new(),
            message: "stream ended without a result".to_string(),
        };
        (chunks, Err(error))
    }
}

/// Everything currently advertised, for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityListing {
    pub version: u64,
    pub tools: Vec<ToolListing>,
    pub resources: Vec<ResourceDescriptor>,
    pub prompts: Vec<PromptDescriptor>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub collisions: BTreeMap<String, Vec<String>>,
}

/// The routing core.
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    connections: HashMap<String, Arc<dyn BackendConnection>>,
    validator: Arc<dyn ArgumentValidator>,
    sessions: Arc<dyn SessionStore>,
    call_logger: Arc<dyn CallLogger>,
    params: DispatchParams,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        connections: Vec<Arc<dyn BackendConnection>>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let connections = connections
            .into_iter()
            .map(|c| (c.name().to_string(), c))
            .collect();
        Self {
            registry,
            connections,
            validator: Arc::new(BasicArgumentValidator),
            sessions,
            call_logger: Arc::new(NoCallLogger),
            params: DispatchParams::default(),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn ArgumentValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_call_logger(mut self, logger: Arc<dyn CallLogger>) -> Self {
        self.call_logger = logger;
        self
    }

    pub fn with_params(mut self, params: DispatchParams) -> Self {
        self.params = params;
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Invoke a tool and wait for its final result.
    pub async fn invoke(&self, request: InvokeRequest) -> InvokeResponse {
        let session = self
            .sessions
            .get_or_create(request.session_id.as_deref(), request.user_id.as_deref())
            .await;

        let outcome = self.call(&request, None).await;
        self.finish(&session.id, &request, &outcome).await;

        InvokeResponse {
            session_id: session.id,
            outcome,
        }
    }

    /// Invoke a tool, streaming incremental output as it arrives.
    pub async fn invoke_streaming(self: &Arc<Self>, request: InvokeRequest) -> InvocationStream {
        let session = self
            .sessions
            .get_or_create(request.session_id.as_deref(), request.user_id.as_deref())
            .await;
        let session_id = session.id;

        let (tx, rx) = mpsc::channel(self.params.stream_buffer.max(1));
        let this = Arc::clone(self);
        let task_session = session_id.clone();

        tokio::spawn(async move {
            let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
            let mut call = Box::pin(this.call(&request, Some(chunk_tx)));

            let outcome = loop {
                tokio::select! {
                    biased;
                    Some(chunk) = chunk_rx.recv() => {
                        if tx.send(InvocationEvent::Chunk(chunk)).await.is_err() {
                            break None;
                        }
                    }
                    outcome = &mut call => break Some(outcome),
                    _ = tx.closed() => break None,
                }
            };
            let Some(outcome) = outcome else {
                debug!(tool = %request.tool, "Stream receiver dropped, cancelling call");
                // Dropping the call future cancels the backend request.
                drop(call);
                this.record_cancelled(&task_session, &request).await;
                return;
            };

            // Chunks delivered before the final frame.
            while let Ok(chunk) = chunk_rx.try_recv() {
                let _ = tx.send(InvocationEvent::Chunk(chunk)).await;
            }

            this.finish(&task_session, &request, &outcome).await;

            let terminal = match outcome {
                Ok(result) => InvocationEvent::Completed(result),
                Err(error) => InvocationEvent::Failed(error),
            };
            let _ = tx.send(terminal).await;
        });

        InvocationStream {
            session_id,
            receiver: rx,
        }
    }

    /// Fetch a resource by concrete URI.
    pub async fn fetch_resource(
        &self,
        uri: &str,
        timeout: Option<Duration>,
    ) -> Result<ResourceContent, GatewayError> {
        let resolved =
            self.registry
                .resolve_resource(uri)
                .ok_or_else(|| GatewayError::UnknownResource {
                    uri: uri.to_string(),
                })?;
        let backend = resolved.descriptor.backend.clone();
        let connection = self.ready_connection(&backend)?;

        let timeout = self.params.effective_timeout(timeout);
        let deadline = Instant::now() + timeout;
        let started = Instant::now();

        let result = match tokio::time::timeout_at(deadline, connection.fetch_resource(uri, deadline))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                backend: backend.clone(),
                target: uri.to_string(),
                after: timeout,
            }),
        };

        match &result {
            Ok(content) => self.call_logger.log(CallEvent::new(
                "resource_fetched",
                serde_json::json!({
                    "backend": backend,
                    "uri": uri,
                    "bytes": content.text.len(),
                    "duration_ms": started.elapsed().as_millis() as u64,
                }),
            )),
            Err(error) => self.log_failure(None, uri, error),
        }

        result.map(|mut content| {
            content.backend = backend;
            content
        })
    }

    /// Render a prompt template on the backend that owns it.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> Result<RenderedPrompt, GatewayError> {
        let prompt = self
            .registry
            .resolve_prompt(name)
            .ok_or_else(|| GatewayError::UnknownTool {
                name: name.to_string(),
            })?;
        let connection = self.ready_connection(&prompt.backend)?;

        let timeout = self.params.effective_timeout(timeout);
        let deadline = Instant::now() + timeout;

        let result = match tokio::time::timeout_at(
            deadline,
            connection.get_prompt(&prompt.name, arguments, deadline),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                backend: prompt.backend.clone(),
                target: prompt.name.clone(),
                after: timeout,
            }),
        };

        match &result {
            Ok(_) => self.call_logger.log(CallEvent::new(
                "prompt_rendered",
                serde_json::json!({"backend": prompt.backend, "prompt": prompt.name}),
            )),
            Err(error) => self.log_failure(None, name, error),
        }

        result.map(|mut rendered| {
            rendered.backend = prompt.backend.clone();
            rendered
        })
    }

    /// All tools, resources and prompts currently in the catalog.
    pub fn list_capabilities(&self) -> CapabilityListing {
        let catalog = self.registry.snapshot();
        CapabilityListing {
            version: catalog.version(),
            tools: catalog.tool_listing(),
            resources: catalog.resources().map(|r| (**r).clone()).collect(),
            prompts: catalog.prompts().iter().map(|p| (**p).clone()).collect(),
            collisions: catalog.collisions().clone(),
        }
    }

    /// Status of every backend in configuration order.
    pub fn backend_status(&self) -> Vec<BackendStatus> {
        self.registry
            .backends()
            .iter()
            .filter_map(|name| self.connections.get(name))
            .map(|c| c.status())
            .collect()
    }

    /// Resolve, validate, gate on readiness, then forward with a deadline.
    async fn call(
        &self,
        request: &InvokeRequest,
        chunks: Option<ChunkSender>,
    ) -> Result<InvokeResult, GatewayError> {
        let tool =
            self.registry
                .resolve(&request.tool)
                .ok_or_else(|| GatewayError::UnknownTool {
                    name: request.tool.clone(),
                })?;

        if let Err(violations) = self.validator.validate(&tool, &request.arguments) {
            return Err(GatewayError::InvalidArguments {
                tool: format!("{}.{}", tool.backend, tool.name),
                violations,
            });
        }

        let connection = self.ready_connection(&tool.backend)?;

        let timeout = self.params.effective_timeout(request.timeout);
        let started = Instant::now();
        let deadline = started + timeout;

        debug!(
            backend = %tool.backend,
            tool = %tool.name,
            timeout_ms = timeout.as_millis() as u64,
            "Dispatching call"
        );

        let forwarded = connection.invoke(&tool.name, request.arguments.clone(), deadline, chunks);
        let content = match tokio::time::timeout_at(deadline, forwarded).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(GatewayError::Timeout {
                    backend: tool.backend.clone(),
                    target: tool.name.clone(),
                    after: timeout,
                });
            }
        };

        Ok(InvokeResult {
            backend: tool.backend.clone(),
            tool: tool.name.clone(),
            content,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn ready_connection(&self, backend: &str) -> Result<&Arc<dyn BackendConnection>, GatewayError> {
        let connection =
            self.connections
                .get(backend)
                .ok_or_else(|| GatewayError::BackendUnavailable {
                    backend: backend.to_string(),
                    state: ConnectionState::Closed,
                })?;
        let state = connection.state();
        if !state.is_ready() {
            debug!(backend = %backend, state = %state, "Rejecting call to backend that is not ready");
            return Err(GatewayError::BackendUnavailable {
                backend: backend.to_string(),
                state,
            });
        }
        Ok(connection)
    }

    /// Record the turn and emit the call log entry.
    async fn finish(
        &self,
        session_id: &str,
        request: &InvokeRequest,
        outcome: &Result<InvokeResult, GatewayError>,
    ) {
        let turn = match outcome {
            Ok(result) => {
                info!(
                    backend = %result.backend,
                    tool = %result.tool,
                    duration_ms = result.duration_ms,
                    "Call completed"
                );
                self.call_logger.log(CallEvent::new(
                    "tool_invoked",
                    serde_json::json!({
                        "session_id": session_id,
                        "backend": result.backend,
                        "tool": result.tool,
                        "duration_ms": result.duration_ms,
                    }),
                ));
                let qualified = format!("{}.{}", result.backend, result.tool);
                Turn::success(
                    request.describe(Some(&qualified)),
                    compact_json(&result.content, self.params.record_max_bytes),
                    &result.backend,
                )
            }
            Err(error) => {
                self.log_failure(Some(session_id), &request.tool, error);
                Turn::failure(request.describe(None), error.to_string(), error.kind().as_str())
            }
        };

        if !self.sessions.append(session_id, turn).await {
            debug!(session_id = %session_id, "Session evicted before turn was recorded");
        }
    }

    async fn record_cancelled(&self, session_id: &str, request: &InvokeRequest) {
        self.call_logger.log(CallEvent::new(
            "call_cancelled",
            serde_json::json!({"session_id": session_id, "tool": request.tool}),
        ));
        let turn = Turn::failure(request.describe(None), CANCELLED_BY_CALLER, "cancelled");
        if !self.sessions.append(session_id, turn).await {
            debug!(session_id = %session_id, "Session evicted before turn was recorded");
        }
    }

    fn log_failure(&self, session_id: Option<&str>, target: &str, error: &GatewayError) {
        warn!(target_name = %target, kind = %error.kind(), error = %error, "Call failed");
        self.call_logger.log(CallEvent::new(
            "call_failed",
            serde_json::json!({
                "session_id": session_id,
                "target": target,
                "kind": error.kind().as_str(),
                "sub_kind": error.execution_kind().map(|k| k.as_str()),
                "backend": error.backend(),
                "message": error.to_string(),
            }),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use toolgate_domain::{
        AtomicConnectionState, CapabilitySet, ErrorKind, ExecutionErrorKind, Session,
        SessionSummary, ToolDescriptor,
    };

    // ==================== Test doubles ====================

    #[derive(Default)]
    struct MemorySessions {
        sessions: Mutex<HashMap<String, Session>>,
        next: AtomicUsize,
    }

    #[async_trait]
    impl SessionStore for MemorySessions {
        async fn get_or_create(&self, id: Option<&str>, user_id: Option<&str>) -> Session {
            let id = id
                .map(str::to_string)
                .unwrap_or_else(|| format!("s{}", self.next.fetch_add(1, Ordering::SeqCst)));
            self.sessions
                .lock()
                .unwrap()
                .entry(id.clone())
                .or_insert_with(|| Session::new(id, user_id))
                .clone()
        }

        async fn append(&self, id: &str, turn: Turn) -> bool {
            match self.sessions.lock().unwrap().get_mut(id) {
                Some(session) => {
                    session.push_turn(turn);
                    true
                }
                None => false,
            }
        }

        async fn evict(&self, _older_than: DateTime<Utc>) -> usize {
            0
        }

        async fn get(&self, id: &str) -> Option<Session> {
            self.sessions.lock().unwrap().get(id).cloned()
        }

        async fn list(&self, _user_id: Option<&str>) -> Vec<SessionSummary> {
            Vec::new()
        }

        async fn delete(&self, id: &str) -> bool {
            self.sessions.lock().unwrap().remove(id).is_some()
        }
    }

    enum Behavior {
        Echo,
        Fail(ExecutionErrorKind),
        Hang,
        Stream(usize),
    }

    struct FakeBackend {
        name: String,
        state: AtomicConnectionState,
        calls: AtomicUsize,
        behavior: Behavior,
        tools: Vec<ToolDescriptor>,
    }

    impl FakeBackend {
        fn new(name: &str, tools: &[&str], behavior: Behavior) -> Arc<Self> {
            let tools = tools
                .iter()
                .map(|t| {
                    ToolDescriptor::new(
                        name,
                        *t,
                        json!({
                            "type": "object",
                            "properties": {"namespace": {"type": "string"}},
                        }),
                    )
                })
                .collect();
            Arc::new(Self {
                name: name.to_string(),
                state: AtomicConnectionState::new(ConnectionState::Ready),
                calls: AtomicUsize::new(0),
                behavior,
                tools,
            })
        }

        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet {
                tools: self.tools.clone(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl BackendConnection for FakeBackend {
        fn name(&self) -> &str {
            &self.name
        }

        fn state(&self) -> ConnectionState {
            self.state.load()
        }

        async fn connect(&self) -> ConnectionState {
            self.state.load()
        }

        async fn discover(&self) -> Result<CapabilitySet, GatewayError> {
            Ok(self.capabilities())
        }

        async fn invoke(
            &self,
            tool: &str,
            arguments: Value,
            _deadline: Instant,
            chunks: Option<ChunkSender>,
        ) -> Result<Value, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Echo => Ok(json!({"tool": tool, "args": arguments})),
                Behavior::Fail(kind) => Err(GatewayError::Execution {
                    backend: self.name.clone(),
                    kind: *kind,
                    message: "rejected".to_string(),
                }),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Value::Null)
                }
                Behavior::Stream(n) => {
                    if let Some(chunks) = chunks {
                        for i in 0..*n {
                            let _ = chunks.send(json!(i));
                        }
                    }
                    Ok(json!("done"))
                }
            }
        }

        async fn fetch_resource(
            &self,
            uri: &str,
            _deadline: Instant,
        ) -> Result<ResourceContent, GatewayError> {
            Ok(ResourceContent::new(uri, "content"))
        }

        async fn get_prompt(
            &self,
            name: &str,
            _arguments: Value,
            _deadline: Instant,
        ) -> Result<RenderedPrompt, GatewayError> {
            Ok(RenderedPrompt {
                backend: String::new(),
                name: name.to_string(),
                description: String::new(),
                text: "rendered".to_string(),
            })
        }

        async fn health_check(&self) -> bool {
            self.state.load().is_ready()
        }

        fn status(&self) -> BackendStatus {
            BackendStatus {
                name: self.name.clone(),
                state: self.state.load(),
                in_flight: 0,
                reconnect_attempts: 0,
                last_error: None,
                tools: self.tools.len(),
                resources: 0,
                prompts: 0,
            }
        }
    }

    fn dispatcher(backends: &[Arc<FakeBackend>]) -> (Arc<Dispatcher>, Arc<MemorySessions>) {
        let registry = Arc::new(CapabilityRegistry::new(
            backends.iter().map(|b| b.name.clone()).collect(),
        ));
        for backend in backends {
            registry
                .rebuild(&backend.name, backend.capabilities())
                .unwrap();
        }
        let sessions = Arc::new(MemorySessions::default());
        let connections = backends
            .iter()
            .map(|b| Arc::clone(b) as Arc<dyn BackendConnection>)
            .collect();
        let dispatcher = Dispatcher::new(registry, connections, sessions.clone());
        (Arc::new(dispatcher), sessions)
    }

    // ==================== Routing ====================

    #[tokio::test]
    async fn test_routes_to_owning_backend_only() {
        let b1 = FakeBackend::new("b1", &["list_jobs"], Behavior::Echo);
        let b2 = FakeBackend::new("b2", &["list_pods"], Behavior::Echo);
        let (dispatcher, _) = dispatcher(&[b1.clone(), b2.clone()]);

        let response = dispatcher
            .invoke(InvokeRequest::new("list_pods", json!({})))
            .await;

        let result = response.outcome.unwrap();
        assert_eq!(result.backend, "b2");
        assert_eq!(b2.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b1.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool_makes_no_call() {
        let b1 = FakeBackend::new("b1", &["list_jobs"], Behavior::Echo);
        let (dispatcher, _) = dispatcher(&[b1.clone()]);

        let response = dispatcher.invoke(InvokeRequest::new("foo", json!({}))).await;

        assert_eq!(response.outcome.unwrap_err().kind(), ErrorKind::UnknownTool);
        assert_eq!(b1.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_arguments_fail_before_backend() {
        let b1 = FakeBackend::new("b1", &["list_pods"], Behavior::Echo);
        let (dispatcher, _) = dispatcher(&[b1.clone()]);

        let response = dispatcher
            .invoke(InvokeRequest::new("list_pods", json!({"namespace": 7})))
            .await;

        match response.outcome.unwrap_err() {
            GatewayError::InvalidArguments { tool, violations } => {
                assert_eq!(tool, "b1.list_pods");
                assert_eq!(violations[0].path, "/namespace");
                assert_eq!(violations[0].constraint, "type");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(b1.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_degraded_backend_rejected_immediately() {
        let b1 = FakeBackend::new("b1", &["list_jobs"], Behavior::Hang);
        b1.state.swap(ConnectionState::Degraded);
        let (dispatcher, _) = dispatcher(&[b1.clone()]);

        let started = std::time::Instant::now();
        let response = dispatcher
            .invoke(InvokeRequest::new("list_jobs", json!({})).with_timeout(Duration::from_secs(30)))
            .await;

        assert!(started.elapsed() < Duration::from_secs(1));
        match response.outcome.unwrap_err() {
            GatewayError::BackendUnavailable { backend, state } => {
                assert_eq!(backend, "b1");
                assert_eq!(state, ConnectionState::Degraded);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(b1.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deadline_produces_timeout() {
        let b1 = FakeBackend::new("b1", &["build"], Behavior::Hang);
        let (dispatcher, _) = dispatcher(&[b1]);

        let response = dispatcher
            .invoke(InvokeRequest::new("build", json!({})).with_timeout(Duration::from_millis(50)))
            .await;

        assert_eq!(response.outcome.unwrap_err().kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_execution_error_passes_through_typed() {
        let b1 = FakeBackend::new("b1", &["deploy"], Behavior::Fail(ExecutionErrorKind::Conflict));
        let (dispatcher, _) = dispatcher(&[b1]);

        let response = dispatcher.invoke(InvokeRequest::new("deploy", json!({}))).await;
        let error = response.outcome.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ExecutionError);
        assert_eq!(error.execution_kind(), Some(ExecutionErrorKind::Conflict));
    }

    // ==================== Sessions ====================

    #[tokio::test]
    async fn test_turns_recorded_without_argument_values() {
        let b1 = FakeBackend::new("b1", &["list_pods"], Behavior::Fail(ExecutionErrorKind::AuthFailure));
        let (dispatcher, sessions) = dispatcher(&[b1]);

        let response = dispatcher
            .invoke(
                InvokeRequest::new("list_pods", json!({"namespace": "secret-ns"}))
                    .with_session("abc"),
            )
            .await;
        assert_eq!(response.session_id, "abc");

        let session = sessions.get("abc").await.unwrap();
        assert_eq!(session.turns.len(), 1);
        let turn = &session.turns[0];
        assert_eq!(turn.request, "list_pods(namespace)");
        assert!(!turn.request.contains("secret-ns"));
        assert!(!turn.response.contains("secret-ns"));
        assert!(!turn.is_success());
    }

    #[tokio::test]
    async fn test_new_session_created_when_absent() {
        let b1 = FakeBackend::new("b1", &["list_jobs"], Behavior::Echo);
        let (dispatcher, sessions) = dispatcher(&[b1]);

        let response = dispatcher.invoke(InvokeRequest::new("list_jobs", json!({}))).await;
        let session = sessions.get(&response.session_id).await.unwrap();
        assert_eq!(session.turns[0].request, "b1.list_jobs()");
        assert!(session.turns[0].is_success());
    }

    // ==================== Streaming ====================

    #[tokio::test]
    async fn test_streaming_delivers_chunks_in_order_then_result() {
        let b1 = FakeBackend::new("b1", &["tail_log"], Behavior::Stream(5));
        let (dispatcher, _) = dispatcher(&[b1]);

        let stream = dispatcher
            .invoke_streaming(InvokeRequest::new("tail_log", json!({})))
            .await;
        let (chunks, outcome) = stream.collect().await;

        assert_eq!(chunks, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
        assert_eq!(outcome.unwrap().content, json!("done"));
    }

    #[tokio::test]
    async fn test_streaming_failure_is_terminal_event() {
        let (dispatcher, _) = dispatcher(&[]);
        let stream = dispatcher
            .invoke_streaming(InvokeRequest::new("nope", json!({})))
            .await;
        let (chunks, outcome) = stream.collect().await;
        assert!(chunks.is_empty());
        assert_eq!(outcome.unwrap_err().kind(), ErrorKind::UnknownTool);
    }

    #[tokio::test]
    async fn test_dropped_stream_records_cancelled_turn() {
        let b1 = FakeBackend::new("b1", &["wait_rollout"], Behavior::Hang);
        let (dispatcher, sessions) = dispatcher(&[b1.clone()]);

        let stream = dispatcher
            .invoke_streaming(InvokeRequest::new("wait_rollout", json!({})).with_session("s"))
            .await;
        while b1.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        drop(stream);

        let turns = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let session = sessions.get("s").await.unwrap();
                if !session.turns.is_empty() {
                    return session.turns;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("cancelled call left no turn");

        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].response, CANCELLED_BY_CALLER);
        assert_eq!(
            turns[0].outcome,
            toolgate_domain::TurnOutcome::Failure {
                kind: "cancelled".to_string()
            }
        );
    }

    // ==================== Envelope & introspection ====================

    #[tokio::test]
    async fn test_envelope_shapes() {
        let b1 = FakeBackend::new("b1", &["list_jobs"], Behavior::Echo);
        let (dispatcher, _) = dispatcher(&[b1]);

        let ok = dispatcher.invoke(InvokeRequest::new("list_jobs", json!({}))).await;
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["backend"], "b1");
        assert!(value.get("result").is_some());
        assert!(value.get("error").is_none());

        let err = dispatcher.invoke(InvokeRequest::new("foo", json!({}))).await;
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["error"]["kind"], "unknown_tool");
        assert!(value["error"]["message"].as_str().unwrap().contains("foo"));
        assert!(value.get("result").is_none());
    }

    #[tokio::test]
    async fn test_list_capabilities_and_status() {
        let b1 = FakeBackend::new("b1", &["list_jobs", "status"], Behavior::Echo);
        let b2 = FakeBackend::new("b2", &["list_pods", "status"], Behavior::Echo);
        let (dispatcher, _) = dispatcher(&[b1, b2]);

        let listing = dispatcher.list_capabilities();
        let qualified: Vec<_> = listing.tools.iter().map(|t| t.qualified_name.as_str()).collect();
        assert_eq!(qualified, vec!["b1.list_jobs", "b1.status", "b2.list_pods", "b2.status"]);
        assert_eq!(listing.collisions["status"], vec!["b1", "b2"]);

        let status = dispatcher.backend_status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].name, "b1");
    }

    #[tokio::test]
    async fn test_unknown_resource() {
        let b1 = FakeBackend::new("b1", &["list_jobs"], Behavior::Echo);
        let (dispatcher, _) = dispatcher(&[b1]);
        let err = dispatcher.fetch_resource("ci://jobs/x", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownResource);
    }
}
