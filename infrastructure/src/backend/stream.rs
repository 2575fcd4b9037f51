//! Opening the byte stream to a backend.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use toolgate_domain::{BackendConfig, TransportKind};
use tracing::debug;

use crate::rpc::error::{Result, TransportError};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read and write halves of one backend transport.
///
/// For `stdio` backends the child process travels with the stream and is
/// killed when the stream's owner drops it.
pub struct BackendStream {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub child: Option<Child>,
}

impl BackendStream {
    pub fn new(reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            reader,
            writer,
            child: None,
        }
    }
}

/// Open the transport described by `config`, bounded by `timeout`.
pub async fn open(config: &BackendConfig, timeout: Duration) -> Result<BackendStream> {
    match config.transport {
        TransportKind::Tcp => {
            debug!(backend = %config.name, endpoint = %config.endpoint, "Connecting over TCP");
            let stream = tokio::time::timeout(timeout, TcpStream::connect(&config.endpoint))
                .await
                .map_err(|_| TransportError::Timeout)??;
            stream.set_nodelay(true)?;
            let (read_half, write_half) = stream.into_split();
            Ok(BackendStream::new(Box::new(read_half), Box::new(write_half)))
        }
        TransportKind::Stdio => spawn_stdio(config),
    }
}

fn spawn_stdio(config: &BackendConfig) -> Result<BackendStream> {
    let mut parts = config.endpoint.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| TransportError::Spawn("empty command".to_string()))?;

    debug!(backend = %config.name, program = %program, "Spawning stdio backend");

    let mut cmd = Command::new(program);
    cmd.args(parts)
        .args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    // Linux: request kernel to send SIGTERM to child when parent dies.
    #[cfg(target_os = "linux")]
    unsafe {
        cmd.pre_exec(|| {
            libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
            Ok(())
        });
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| TransportError::Spawn(format!("{}: {}", program, e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TransportError::Spawn("failed to capture stdout".to_string()))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| TransportError::Spawn("failed to capture stdin".to_string()))?;

    Ok(BackendStream {
        reader: Box::new(stdout),
        writer: Box::new(stdin),
        child: Some(child),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = BackendConfig::new("ci", addr.to_string()).unwrap();
        let result = open(&config, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(TransportError::Io(_))));
    }

    #[tokio::test]
    async fn test_stdio_missing_program() {
        let config = BackendConfig::new("ci", "/nonexistent/toolgate-backend")
            .unwrap()
            .with_transport(TransportKind::Stdio);
        let result = open(&config, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(TransportError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_stdio_empty_endpoint() {
        let config = BackendConfig::new("ci", "  ")
            .unwrap()
            .with_transport(TransportKind::Stdio);
        let result = open(&config, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(TransportError::Spawn(_))));
    }
}
