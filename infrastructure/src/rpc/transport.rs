//! Framing and message classification.
//!
//! Every message is a `Content-Length: N\r\n\r\n` header followed by an
//! N-byte JSON body. [`FrameReader`] and [`FrameWriter`] work over any
//! async byte stream, so the same code serves TCP sockets and a child
//! process's stdin/stdout.

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::trace;

use super::error::{Result, TransportError};

/// Upper bound on a single frame body.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Classification of an incoming JSON-RPC message.
///
/// - `Response` → correlated with a pending request by id
/// - `IncomingRequest` → handled by a server
/// - `Notification` → progress / cancellation routing
#[derive(Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// A response to a request we sent (has `id`, no `method`).
    Response,
    /// A request from the peer (has `id` + `method`).
    IncomingRequest,
    /// A notification (has `method`, no `id`).
    Notification,
}

/// Classify a JSON-RPC message by inspecting `id` and `method` fields.
pub fn classify_message(json: &serde_json::Value) -> MessageKind {
    let has_id = json.get("id").is_some_and(|v| !v.is_null());
    let has_method = json.get("method").and_then(|v| v.as_str()).is_some();

    match (has_id, has_method) {
        (true, true) => MessageKind::IncomingRequest,
        (true, false) => MessageKind::Response,
        _ => MessageKind::Notification,
    }
}

/// Reads Content-Length framed bodies.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            line: String::new(),
        }
    }

    /// Read the next frame body. `Ok(None)` on a clean end of stream.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let content_length = match self.read_content_length().await? {
            Some(len) => len,
            None => return Ok(None),
        };
        if content_length > MAX_FRAME_BYTES {
            return Err(TransportError::Frame(format!(
                "frame of {} bytes exceeds limit",
                content_length
            )));
        }

        // Skip remaining headers up to the blank line
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Err(TransportError::Closed);
            }
            if self.line.trim().is_empty() {
                break;
            }
        }

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).await?;
        trace!(bytes = content_length, "Frame received");
        Ok(Some(body))
    }

    async fn read_content_length(&mut self) -> Result<Option<usize>> {
        loop {
            self.line.clear();
            let bytes_read = self.reader.read_line(&mut self.line).await?;
            if bytes_read == 0 {
                return Ok(None);
            }

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(len_str) = trimmed.strip_prefix("Content-Length:") {
                return len_str
                    .trim()
                    .parse::<usize>()
                    .map(Some)
                    .map_err(|_| TransportError::Frame(format!("bad header: {}", trimmed)));
            }
            return Err(TransportError::Frame(format!("unexpected header: {}", trimmed)));
        }
    }
}

/// Writes Content-Length framed bodies.
pub struct FrameWriter<W> {
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: BufWriter::new(inner),
        }
    }

    /// Serialize `message` and write it as one frame.
    pub async fn write_message<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let json = serde_json::to_string(message)?;
        trace!("Sending: {}", json);
        let header = format!("Content-Length: {}\r\n\r\n", json.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
