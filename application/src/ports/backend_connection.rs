//! Backend Connection port
//!
//! One implementation instance per configured backend. It owns the
//! transport, discovery and invocation for that backend; the dispatcher
//! only routes to it.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use toolgate_domain::{
    CapabilitySet, ConnectionState, GatewayError, RenderedPrompt, ResourceContent,
};

/// Sender for incremental chunks of one streamed invocation.
pub type ChunkSender = mpsc::UnboundedSender<Value>;

/// Point-in-time status of one backend connection.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub state: ConnectionState,
    pub in_flight: usize,
    pub reconnect_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub tools: usize,
    pub resources: usize,
    pub prompts: usize,
}

/// Port for one logical connection to one backend.
///
/// `invoke`, `fetch_resource` and `get_prompt` must fail fast with
/// [`GatewayError::BackendUnavailable`] when the connection is not Ready,
/// and must never wait past `deadline`.
#[async_trait]
pub trait BackendConnection: Send + Sync {
    /// Configured backend name.
    fn name(&self) -> &str;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Establish the transport and handshake, returning the resulting state.
    async fn connect(&self) -> ConnectionState;

    /// Enumerate the backend's tools, resources and prompts.
    async fn discover(&self) -> Result<CapabilitySet, GatewayError>;

    /// Call a tool.
    ///
    /// When `chunks` is given, incremental output is forwarded to it in send
    /// order before the final value is returned.
    async fn invoke(
        &self,
        tool: &str,
        arguments: Value,
        deadline: Instant,
        chunks: Option<ChunkSender>,
    ) -> Result<Value, GatewayError>;

    /// Fetch a resource by concrete URI.
    async fn fetch_resource(
        &self,
        uri: &str,
        deadline: Instant,
    ) -> Result<ResourceContent, GatewayError>;

    /// Render a prompt template.
    async fn get_prompt(
        &self,
        name: &str,
        arguments: Value,
        deadline: Instant,
    ) -> Result<RenderedPrompt, GatewayError>;

    /// Probe liveness. `false` on any failure.
    async fn health_check(&self) -> bool;

    /// Snapshot of counters for introspection.
    fn status(&self) -> BackendStatus;
}
