//! JSON-RPC protocol types for gateway ↔ backend communication.
//!
//! # Protocol Overview
//!
//! - **Requests**: Gateway → backend (`initialize`, `tools/list`, `tools/call`, ...)
//! - **Responses**: Backend → gateway (result or error)
//! - **Notifications**: Backend → gateway `notifications/progress` carrying
//!   streamed chunks; gateway → backend `notifications/cancelled` when a
//!   call's deadline elapsed.
//!
//! Failures a backend reports travel as [`RpcError`]s whose `data.kind`
//! carries the execution sub-kind, so the gateway can rebuild the typed
//! [`ExecutionError`] on its side.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolgate_domain::{
    ExecutionError, ExecutionErrorKind, PromptDescriptor, ResourceDescriptor, SchemaViolation,
    ToolDescriptor,
};

/// Protocol revision exchanged during `initialize`.
pub const PROTOCOL_VERSION: &str = "toolgate/1";

/// Method names.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const PROMPTS_GET: &str = "prompts/get";
    pub const PROGRESS: &str = "notifications/progress";
    pub const CANCELLED: &str = "notifications/cancelled";
}

/// Error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// A wrapped-system failure; `data.kind` names the sub-kind.
    pub const EXECUTION_ERROR: i64 = -32000;
}

/// Global request ID counter for JSON-RPC requests.
static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generates a unique request ID.
fn next_id() -> u64 {
    REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// JSON-RPC request (outgoing)
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Creates a new JSON-RPC request with an auto-generated ID.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: next_id(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC request as received by a server. The id is echoed back verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingRequest {
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC response (incoming)
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    /// Split into the result value or the peer's error.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// JSON-RPC response (outgoing, server side)
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponseOut {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcResponseOut {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC notification (either direction)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

fn default_version() -> String {
    "2.0".to_string()
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: default_version(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(codes::PARSE_ERROR, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("method not found: {}", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }

    fn data_kind(&self) -> Option<&str> {
        self.data.as_ref()?.get("kind")?.as_str()
    }

    /// Rebuild the backend-side execution error this RPC error encodes.
    pub fn to_execution(&self) -> ExecutionError {
        match self.code {
            codes::METHOD_NOT_FOUND => {
                let tool = self
                    .data
                    .as_ref()
                    .and_then(|d| d.get("tool"))
                    .and_then(|t| t.as_str())
                    .unwrap_or(&self.message);
                ExecutionError::UnknownTool(tool.to_string())
            }
            codes::INVALID_PARAMS => {
                let violations = self
                    .data
                    .as_ref()
                    .and_then(|d| d.get("violations"))
                    .and_then(|v| serde_json::from_value::<Vec<SchemaViolation>>(v.clone()).ok())
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| vec![SchemaViolation::new("", "params", &self.message)]);
                ExecutionError::InvalidArguments(violations)
            }
            codes::EXECUTION_ERROR => {
                let kind = self
                    .data_kind()
                    .and_then(|k| k.parse::<ExecutionErrorKind>().ok())
                    .unwrap_or(ExecutionErrorKind::Internal);
                ExecutionError::new(kind, self.message.clone())
            }
            _ => ExecutionError::internal(self.message.clone()),
        }
    }
}

impl From<&ExecutionError> for RpcError {
    fn from(error: &ExecutionError) -> Self {
        match error {
            ExecutionError::UnknownTool(name) => RpcError::new(
                codes::METHOD_NOT_FOUND,
                format!("unknown tool: {}", name),
            )
            .with_data(serde_json::json!({"kind": "not_found", "tool": name})),
            ExecutionError::InvalidArguments(violations) => {
                RpcError::invalid_params(error.to_string()).with_data(serde_json::json!({
                    "kind": "invalid_arguments",
                    "violations": violations,
                }))
            }
            ExecutionError::Failed { kind, message } => {
                RpcError::new(codes::EXECUTION_ERROR, message.clone())
                    .with_data(serde_json::json!({"kind": kind.as_str()}))
            }
        }
    }
}

// ==================== Method parameters and results ====================

/// `initialize` parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub client_name: String,
    /// Opaque connection parameters from the gateway's backend config.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

/// `initialize` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub server_name: String,
    #[serde(default)]
    pub server_version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesListResult {
    pub resources: Vec<ResourceDescriptor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsListResult {
    pub prompts: Vec<PromptDescriptor>,
}

/// `tools/call` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    /// Whether the caller wants `notifications/progress` for this call.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// `tools/call` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Value,
}

/// `resources/read` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReadParams {
    pub uri: String,
}

/// `prompts/get` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptGetParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// `notifications/progress` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    pub request_id: Value,
    pub sequence: u64,
    pub chunk: Value,
}

/// `notifications/cancelled` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledParams {
    pub request_id: Value,
}
