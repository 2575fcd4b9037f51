//! Request/response multiplexer for one backend transport.
//!
//! A single background reader task owns the read half and routes each
//! incoming frame:
//!
//! - **Response** → the pending call's `oneshot` (correlated by `id`)
//! - **`notifications/progress`** → the pending call's chunk sender, so
//!   chunks of one call arrive in send order and never mix with another
//!   call's chunks
//!
//! Writes go through a shared `Mutex`-guarded [`FrameWriter`], so any number
//! of calls can be in flight on one connection.
//!
//! When the reader ends (peer closed, I/O error, framing error) the
//! [`closed`](RpcClient::closed) token fires and every pending call fails
//! with [`TransportError::Closed`] instead of hanging.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::process::Child;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use toolgate_application::ChunkSender;
use tracing::{debug, info, trace, warn};

use super::stream::{BackendStream, BoxedReader, BoxedWriter};
use crate::rpc::error::{Result, TransportError};
use crate::rpc::protocol::{
    CancelledParams, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ProgressParams,
    methods,
};
use crate::rpc::transport::{FrameReader, FrameWriter, MessageKind, classify_message};

struct PendingCall {
    tx: oneshot::Sender<JsonRpcResponse>,
    progress: Option<ChunkSender>,
}

/// Request-response correlation (request_id -> pending call).
///
/// Uses `std::sync::Mutex` so [`PendingGuard::drop`] can remove entries
/// synchronously. The lock is only held for map insert/remove/lookup.
type PendingMap = Arc<std::sync::Mutex<HashMap<u64, PendingCall>>>;

type SharedWriter = Arc<Mutex<FrameWriter<BoxedWriter>>>;

pub struct RpcClient {
    backend: String,
    pending: PendingMap,
    writer: SharedWriter,
    closed: CancellationToken,
    reader_handle: JoinHandle<()>,
    /// Child process of a `stdio` backend (killed on Drop).
    child: Option<Child>,
}

impl RpcClient {
    /// Take ownership of `stream` and start the background reader.
    pub fn start(backend: &str, stream: BackendStream) -> Arc<Self> {
        let pending: PendingMap = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();
        let writer = Arc::new(Mutex::new(FrameWriter::new(stream.writer)));

        let reader_handle = tokio::spawn(Self::reader_loop(
            backend.to_string(),
            stream.reader,
            Arc::clone(&pending),
            closed.clone(),
        ));

        Arc::new(Self {
            backend: backend.to_string(),
            pending,
            writer,
            closed,
            reader_handle,
            child: stream.child,
        })
    }

    /// Token that fires once the transport is gone.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn pending_count(&self) -> usize {
        lock_pending(&self.pending).len()
    }

    /// Background reader loop: single owner of the read half.
    async fn reader_loop(
        backend: String,
        reader: BoxedReader,
        pending: PendingMap,
        closed: CancellationToken,
    ) {
        let mut reader = FrameReader::new(reader);

        loop {
            let body = match reader.read_frame().await {
                Ok(Some(body)) => body,
                Ok(None) => {
                    info!(backend = %backend, "Backend closed the connection");
                    break;
                }
                Err(e) => {
                    warn!(backend = %backend, error = %e, "Reader loop ended");
                    break;
                }
            };

            let json_value: Value = match serde_json::from_slice(&body) {
                Ok(v) => v,
                Err(e) => {
                    warn!(backend = %backend, error = %e, "Dropping unparseable frame");
                    continue;
                }
            };

            match classify_message(&json_value) {
                MessageKind::Response => {
                    let response: JsonRpcResponse = match serde_json::from_value(json_value) {
                        Ok(r) => r,
                        Err(e) => {
                            warn!(backend = %backend, error = %e, "Failed to parse response");
                            continue;
                        }
                    };
                    let Some(id) = response.id else {
                        debug!(backend = %backend, "Response without numeric id");
                        continue;
                    };
                    let call = lock_pending(&pending).remove(&id);
                    match call {
                        Some(call) => {
                            let _ = call.tx.send(response);
                        }
                        None => {
                            debug!(backend = %backend, id, "No pending receiver for response")
                        }
                    }
                }

                MessageKind::Notification => {
                    let notification: JsonRpcNotification =
                        match serde_json::from_value(json_value) {
                            Ok(n) => n,
                            Err(e) => {
                                warn!(backend = %backend, error = %e, "Failed to parse notification");
                                continue;
                            }
                        };
                    if notification.method != methods::PROGRESS {
                        trace!(backend = %backend, method = %notification.method, "Ignoring notification");
                        continue;
                    }
                    let Some(progress) = notification
                        .params
                        .and_then(|p| serde_json::from_value::<ProgressParams>(p).ok())
                    else {
                        debug!(backend = %backend, "Malformed progress notification");
                        continue;
                    };
                    let Some(id) = progress.request_id.as_u64() else {
                        continue;
                    };
                    {
                        let guard = lock_pending(&pending);
                        if let Some(tx) = guard.get(&id).and_then(|c| c.progress.as_ref()) {
                            let _ = tx.send(progress.chunk);
                        }
                    }
                }

                MessageKind::IncomingRequest => {
                    debug!(backend = %backend, "Ignoring request from backend");
                }
            }
        }

        // Reader ended: drop all senders so waiting calls observe Closed
        closed.cancel();
        lock_pending(&pending).clear();
    }

    /// Send a request and wait for its response until `deadline`.
    ///
    /// Progress notifications for this request are forwarded to `progress`.
    /// If the deadline elapses or the returned future is dropped, the
    /// pending entry is removed and the backend is told to cancel.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Instant,
        progress: Option<ChunkSender>,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let request = JsonRpcRequest::new(method, params);
        let request_id = request.id;
        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(request_id, PendingCall { tx, progress });

        let mut guard = PendingGuard {
            id: request_id,
            pending: Arc::clone(&self.pending),
            writer: Arc::clone(&self.writer),
            closed: self.closed.clone(),
            completed: false,
        };

        match tokio::time::timeout_at(deadline, self.write(&request)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                guard.completed = true;
                return Err(e);
            }
            Err(_) => return Err(TransportError::Timeout),
        }

        let response = tokio::select! {
            response = rx => response.map_err(|_| TransportError::Closed)?,
            _ = tokio::time::sleep_until(deadline) => {
                debug!(backend = %self.backend, id = request_id, method = %method, "Request deadline elapsed");
                return Err(TransportError::Timeout);
            }
        };
        guard.completed = true;

        response.into_result().map_err(TransportError::Rpc)
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        let mut writer = self.writer.lock().await;
        writer.write_message(&notification).await
    }

    async fn write(&self, request: &JsonRpcRequest) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_message(request).await
    }

    /// Stop the reader and release the transport.
    pub fn close(&self) {
        self.closed.cancel();
        self.reader_handle.abort();
        lock_pending(&self.pending).clear();
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        debug!(backend = %self.backend, "RpcClient dropping");
        self.reader_handle.abort();
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

fn lock_pending(
    pending: &PendingMap,
) -> std::sync::MutexGuard<'_, HashMap<u64, PendingCall>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// Removes a request's pending entry when its caller stops waiting.
struct PendingGuard {
    id: u64,
    pending: PendingMap,
    writer: SharedWriter,
    closed: CancellationToken,
    completed: bool,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let removed = lock_pending(&self.pending).remove(&self.id).is_some();
        if self.completed || !removed || self.closed.is_cancelled() {
            return;
        }

        // Caller gave up (deadline or drop): tell the backend to stop work.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let writer = Arc::clone(&self.writer);
        let id = self.id;
        handle.spawn(async move {
            let params = serde_json::to_value(CancelledParams {
                request_id: Value::from(id),
            })
            .ok();
            let notification = JsonRpcNotification::new(methods::CANCELLED, params);
            let mut writer = writer.lock().await;
            if let Err(e) = writer.write_message(&notification).await {
                debug!(id, error = %e, "Failed to send cancellation");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;

    /// A scripted peer on the far side of an in-memory pipe.
    fn pair() -> (Arc<RpcClient>, FrameReader<DuplexStream>, FrameWriter<DuplexStream>) {
        let (client_read, peer_write) = tokio::io::duplex(64 * 1024);
        let (peer_read, client_write) = tokio::io::duplex(64 * 1024);
        let client = RpcClient::start(
            "test",
            BackendStream::new(Box::new(client_read), Box::new(client_write)),
        );
        (client, FrameReader::new(peer_read), FrameWriter::new(peer_write))
    }

    async fn next_json(reader: &mut FrameReader<DuplexStream>) -> Value {
        let body = reader.read_frame().await.unwrap().unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn deadline(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn test_request_response_correlation() {
        let (client, mut peer_in, mut peer_out) = pair();

        let call = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.request("ping", None, deadline(5), None).await }
        });

        let request = next_json(&mut peer_in).await;
        assert_eq!(request["method"], "ping");
        peer_out
            .write_message(&json!({"jsonrpc": "2.0", "id": request["id"], "result": {"ok": true}}))
            .await
            .unwrap();

        assert_eq!(call.await.unwrap().unwrap(), json!({"ok": true}));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let (client, mut peer_in, mut peer_out) = pair();

        let first = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.request("a", None, deadline(5), None).await }
        });
        let req_a = next_json(&mut peer_in).await;
        let second = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.request("b", None, deadline(5), None).await }
        });
        let req_b = next_json(&mut peer_in).await;

        peer_out
            .write_message(&json!({"jsonrpc": "2.0", "id": req_b["id"], "result": "b"}))
            .await
            .unwrap();
        peer_out
            .write_message(&json!({"jsonrpc": "2.0", "id": req_a["id"], "result": "a"}))
            .await
            .unwrap();

        assert_eq!(first.await.unwrap().unwrap(), json!("a"));
        assert_eq!(second.await.unwrap().unwrap(), json!("b"));
    }

    #[tokio::test]
    async fn test_progress_routed_to_its_call() {
        let (client, mut peer_in, mut peer_out) = pair();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let call = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.request("tools/call", None, deadline(5), Some(tx)).await }
        });
        let request = next_json(&mut peer_in).await;

        for i in 0..3 {
            peer_out
                .write_message(&json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/progress",
                    "params": {"requestId": request["id"], "sequence": i, "chunk": i}
                }))
                .await
                .unwrap();
        }
        peer_out
            .write_message(&json!({"jsonrpc": "2.0", "id": request["id"], "result": "done"}))
            .await
            .unwrap();

        assert_eq!(call.await.unwrap().unwrap(), json!("done"));
        let mut chunks = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            chunks.push(chunk);
        }
        assert_eq!(chunks, vec![json!(0), json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_rpc_error_surfaces() {
        let (client, mut peer_in, mut peer_out) = pair();
        let call = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.request("nope", None, deadline(5), None).await }
        });
        let request = next_json(&mut peer_in).await;
        peer_out
            .write_message(&json!({
                "jsonrpc": "2.0", "id": request["id"],
                "error": {"code": -32601, "message": "method not found: nope"}
            }))
            .await
            .unwrap();

        match call.await.unwrap() {
            Err(TransportError::Rpc(e)) => assert_eq!(e.code, -32601),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deadline_sends_cancellation() {
        let (client, mut peer_in, _peer_out) = pair();

        let result = client
            .request("tools/call", None, Instant::now() + Duration::from_millis(50), None)
            .await;
        assert!(matches!(result, Err(TransportError::Timeout)));
        assert_eq!(client.pending_count(), 0);

        let request = next_json(&mut peer_in).await;
        let cancel = next_json(&mut peer_in).await;
        assert_eq!(cancel["method"], "notifications/cancelled");
        assert_eq!(cancel["params"]["requestId"], request["id"]);
    }

    #[tokio::test]
    async fn test_peer_disconnect_fails_pending_calls() {
        let (client, mut peer_in, peer_out) = pair();

        let call = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.request("tools/call", None, deadline(30), None).await }
        });
        let _ = next_json(&mut peer_in).await;
        drop(peer_out);

        let started = std::time::Instant::now();
        let result = call.await.unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(client.is_closed());

        let after = client.request("ping", None, deadline(5), None).await;
        assert!(matches!(after, Err(TransportError::Closed)));
    }
}
