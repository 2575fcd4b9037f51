//! Invocation results and streaming events.

use super::error::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A successful tool result, attributed to the backend that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResult {
    pub backend: String,
    pub tool: String,
    pub content: Value,
    pub duration_ms: u64,
}

/// One event of a streamed invocation.
///
/// A stream delivers zero or more `Chunk`s in send order followed by
/// exactly one terminal event.
#[derive(Debug, Clone)]
pub enum InvocationEvent {
    Chunk(Value),
    Completed(InvokeResult),
    Failed(GatewayError),
}

impl InvocationEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvocationEvent::Chunk(_))
    }
}

/// Contents of a fetched resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContent {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backend: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub text: String,
}

impl ResourceContent {
    pub fn new(uri: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            backend: String::new(),
            uri: uri.into(),
            mime_type: None,
            text: text.into(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }
}

/// A prompt template rendered by its backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedPrompt {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backend: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(!InvocationEvent::Chunk(Value::Null).is_terminal());
        let done = InvocationEvent::Completed(InvokeResult {
            backend: "ci".to_string(),
            tool: "build".to_string(),
            content: Value::Null,
            duration_ms: 3,
        });
        assert!(done.is_terminal());
    }

    #[test]
    fn test_resource_content_wire_shape() {
        let content = ResourceContent::new("ci://jobs/deploy", "{}").with_mime_type("application/json");
        let value = serde_json::to_value(&content).unwrap();
        assert_eq!(value["mimeType"], "application/json");
        assert!(value.get("backend").is_none());
        assert_eq!(content.bytes(), b"{}");
    }
}
