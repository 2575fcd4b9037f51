//! Backend-side JSON-RPC server.
//!
//! Serves one [`ToolExecutor`] over any framed byte stream. Each request
//! runs in its own task, so a slow call never blocks other calls on the
//! same connection. `notifications/cancelled` aborts the matching task;
//! the wrapped system's side effects are not rolled back.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::executor::ToolExecutor;
use super::registration::ProgressSink;
use crate::rpc::error::Result;
use crate::rpc::protocol::{
    CancelledParams, IncomingRequest, InitializeParams, InitializeResult, JsonRpcNotification,
    JsonRpcResponseOut, PROTOCOL_VERSION, ProgressParams, PromptGetParams, PromptsListResult,
    ResourceReadParams, ResourcesListResult, RpcError, ToolCallParams, ToolCallResult,
    ToolsListResult, methods,
};
use crate::rpc::transport::{FrameReader, FrameWriter, MessageKind, classify_message};

type SharedWriter<W> = Arc<tokio::sync::Mutex<FrameWriter<W>>>;

/// In-flight request tasks of one connection, keyed by request id.
///
/// Dropping the set aborts every task, so a closed connection never leaves
/// work running that nobody will read.
#[derive(Clone, Default)]
struct RequestTasks(Arc<Mutex<HashMap<String, AbortHandle>>>);

impl RequestTasks {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, AbortHandle>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn abort(&self, key: &str) -> bool {
        match self.lock().remove(key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn abort_all(&self) {
        for (_, handle) in self.lock().drain() {
            handle.abort();
        }
    }
}

struct AbortAllOnDrop(RequestTasks);

impl Drop for AbortAllOnDrop {
    fn drop(&mut self) {
        self.0.abort_all();
    }
}

/// Serves a [`ToolExecutor`] to gateway connections.
pub struct BackendServer {
    executor: Arc<ToolExecutor>,
}

/// A running TCP listener.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting and drop every open connection.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

impl BackendServer {
    pub fn new(executor: ToolExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
        }
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    /// Bind `addr` and serve every accepted connection until shutdown.
    pub async fn listen(self: Arc<Self>, addr: &str) -> std::io::Result<ServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        info!(backend = %self.executor.name(), addr = %local, "Backend server listening");

        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                warn!(error = %e, "Accept failed");
                                continue;
                            }
                        };
                        debug!(peer = %peer, "Gateway connected");
                        let server = Arc::clone(&self);
                        let conn_token = token.child_token();
                        connections.spawn(async move {
                            let (read_half, write_half) = stream.into_split();
                            tokio::select! {
                                _ = conn_token.cancelled() => {}
                                result = server.serve(read_half, write_half) => {
                                    if let Err(e) = result {
                                        debug!(peer = %peer, error = %e, "Connection ended with error");
                                    }
                                }
                            }
                        });
                    }
                    Some(_) = connections.join_next(), if !connections.is_empty() => {}
                }
            }
            connections.shutdown().await;
            info!("Backend server stopped");
        });

        Ok(ServerHandle {
            addr: local,
            shutdown,
            task,
        })
    }

    /// Serve the gateway over this process's stdin/stdout.
    pub async fn serve_stdio(&self) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve one connection until the peer closes it.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = FrameReader::new(reader);
        let writer: SharedWriter<W> = Arc::new(tokio::sync::Mutex::new(FrameWriter::new(writer)));
        let tasks = RequestTasks::default();
        let _guard = AbortAllOnDrop(tasks.clone());

        while let Some(body) = reader.read_frame().await? {
            let value: Value = match serde_json::from_slice(&body) {
                Ok(v) => v,
                Err(e) => {
                    let response =
                        JsonRpcResponseOut::failure(Value::Null, RpcError::parse_error(e.to_string()));
                    write(&writer, &response).await;
                    continue;
                }
            };

            match classify_message(&value) {
                MessageKind::IncomingRequest => {
                    let request: IncomingRequest = match serde_json::from_value(value) {
                        Ok(r) => r,
                        Err(e) => {
                            let response = JsonRpcResponseOut::failure(
                                Value::Null,
                                RpcError::invalid_request(e.to_string()),
                            );
                            write(&writer, &response).await;
                            continue;
                        }
                    };
                    self.spawn_request(request, &writer, &tasks);
                }
                MessageKind::Notification => {
                    let Ok(notification) = serde_json::from_value::<JsonRpcNotification>(value)
                    else {
                        continue;
                    };
                    if notification.method == methods::CANCELLED
                        && let Some(params) = notification
                            .params
                            .and_then(|p| serde_json::from_value::<CancelledParams>(p).ok())
                    {
                        let key = params.request_id.to_string();
                        if tasks.abort(&key) {
                            debug!(id = %key, "Request cancelled by gateway");
                        }
                    } else {
                        trace!(method = %notification.method, "Ignoring notification");
                    }
                }
                MessageKind::Response => {
                    trace!("Ignoring response frame");
                }
            }
        }

        debug!(backend = %self.executor.name(), "Gateway closed the connection");
        Ok(())
    }

    fn spawn_request<W>(&self, request: IncomingRequest, writer: &SharedWriter<W>, tasks: &RequestTasks)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let key = request.id.to_string();
        let executor = Arc::clone(&self.executor);
        let writer = Arc::clone(writer);
        let task_tasks = tasks.clone();
        let task_key = key.clone();

        // Hold the map lock across spawn + insert so the task's own removal
        // cannot run before its entry exists.
        let mut registered = tasks.lock();
        let handle = tokio::spawn(async move {
            let id = request.id.clone();
            let response = match handle_request(&executor, request, &writer).await {
                Ok(result) => JsonRpcResponseOut::success(id, result),
                Err(error) => JsonRpcResponseOut::failure(id, error),
            };
            task_tasks.lock().remove(&task_key);
            write(&writer, &response).await;
        });
        registered.insert(key, handle.abort_handle());
    }
}

async fn write<W, T>(writer: &SharedWriter<W>, message: &T)
where
    W: AsyncWrite + Unpin + Send,
    T: serde::Serialize,
{
    let mut writer = writer.lock().await;
    if let Err(e) = writer.write_message(message).await {
        debug!(error = %e, "Failed to write frame");
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> std::result::Result<T, RpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| RpcError::invalid_params(e.to_string()))
}

fn to_result<T: serde::Serialize>(value: T) -> std::result::Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::internal(e.to_string()))
}

async fn handle_request<W>(
    executor: &ToolExecutor,
    request: IncomingRequest,
    writer: &SharedWriter<W>,
) -> std::result::Result<Value, RpcError>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    trace!(method = %request.method, id = %request.id, "Request received");
    match request.method.as_str() {
        methods::INITIALIZE => {
            let params: InitializeParams = parse_params(request.params)?;
            info!(
                client = %params.client_name,
                protocol = %params.protocol_version,
                params = ?params.params.keys().collect::<Vec<_>>(),
                "Gateway handshake"
            );
            to_result(InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_string(),
                server_name: executor.name().to_string(),
                server_version: env!("CARGO_PKG_VERSION").to_string(),
            })
        }
        methods::PING => Ok(json!({})),
        methods::TOOLS_LIST => to_result(ToolsListResult {
            tools: executor.capabilities().tools,
        }),
        methods::RESOURCES_LIST => to_result(ResourcesListResult {
            resources: executor.capabilities().resources,
        }),
        methods::PROMPTS_LIST => to_result(PromptsListResult {
            prompts: executor.capabilities().prompts,
        }),
        methods::TOOLS_CALL => {
            let params: ToolCallParams = parse_params(request.params)?;
            call_tool(executor, request.id, params, writer).await
        }
        methods::RESOURCES_READ => {
            let params: ResourceReadParams = parse_params(request.params)?;
            let content = executor
                .read_resource(&params.uri)
                .await
                .map_err(|e| RpcError::from(&e))?;
            to_result(content)
        }
        methods::PROMPTS_GET => {
            let params: PromptGetParams = parse_params(request.params)?;
            let rendered = executor
                .get_prompt(&params.name, &params.arguments)
                .map_err(|e| RpcError::from(&e))?;
            to_result(rendered)
        }
        other => Err(RpcError::method_not_found(other)),
    }
}

/// Run one tool call, forwarding progress chunks ahead of the response.
async fn call_tool<W>(
    executor: &ToolExecutor,
    id: Value,
    params: ToolCallParams,
    writer: &SharedWriter<W>,
) -> std::result::Result<Value, RpcError>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    if !params.stream {
        let content = executor
            .execute(&params.name, params.arguments, ProgressSink::disabled())
            .await
            .map_err(|e| RpcError::from(&e))?;
        return to_result(ToolCallResult { content });
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let sink = ProgressSink::new(move |chunk| {
        let _ = tx.send(chunk);
    });
    let done = CancellationToken::new();

    let work = async {
        let outcome = executor.execute(&params.name, params.arguments, sink).await;
        done.cancel();
        outcome
    };

    let forward = async {
        let mut sequence = 0u64;
        loop {
            let chunk = tokio::select! {
                biased;
                Some(chunk) = rx.recv() => chunk,
                _ = done.cancelled() => break,
            };
            send_progress(writer, &id, sequence, chunk).await;
            sequence += 1;
        }
        // Chunks emitted just before the call returned.
        while let Ok(chunk) = rx.try_recv() {
            send_progress(writer, &id, sequence, chunk).await;
            sequence += 1;
        }
    };

    let (outcome, ()) = tokio::join!(work, forward);
    let content = outcome.map_err(|e| RpcError::from(&e))?;
    to_result(ToolCallResult { content })
}

async fn send_progress<W>(writer: &SharedWriter<W>, id: &Value, sequence: u64, chunk: Value)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let params = ProgressParams {
        request_id: id.clone(),
        sequence,
        chunk,
    };
    let notification = JsonRpcNotification::new(methods::PROGRESS, serde_json::to_value(params).ok());
    write(writer, &notification).await;
}
