//! Capability descriptors: what a backend advertises during discovery.
//!
//! Descriptors are pure data. They serialize in the same camelCase shape
//! that backends use on the wire (`inputSchema`, `uriTemplate`), so a
//! discovery result can be deserialized straight into these types.
//!
//! The owning `backend` is not sent by backends themselves; the gateway
//! stamps it after discovery via [`CapabilitySet::with_backend`].

use super::qualified::QualifiedName;
use crate::core::error::DomainError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema accepted by a tool that declares no input schema.
pub fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// A schema-described, invocable operation owned by one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backend: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
    /// The tool returns an operation handle instead of a final value.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub long_running: bool,
}

impl ToolDescriptor {
    pub fn new(backend: impl Into<String>, name: impl Into<String>, input_schema: Value) -> Self {
        Self {
            backend: backend.into(),
            name: name.into(),
            description: String::new(),
            input_schema,
            long_running: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn long_running(mut self) -> Self {
        self.long_running = true;
        self
    }

    pub fn qualified_name(&self) -> Result<QualifiedName, DomainError> {
        QualifiedName::new(&self.backend, &self.name)
    }

    /// Names of the fields listed under the schema's `required` keyword.
    pub fn required_fields(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }
}

/// A fetchable piece of backend state addressed by URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backend: String,
    pub uri_template: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ResourceDescriptor {
    pub fn new(backend: impl Into<String>, uri_template: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            uri_template: uri_template.into(),
            description: String::new(),
            mime_type: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// One named argument of a prompt template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl PromptArgument {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
        }
    }
}

/// A reusable prompt template advertised by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptDescriptor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backend: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

impl PromptDescriptor {
    pub fn new(backend: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            name: name.into(),
            description: String::new(),
            arguments: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_argument(mut self, argument: PromptArgument) -> Self {
        self.arguments.push(argument);
        self
    }
}

/// The full result of one backend's discovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySet {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
    #[serde(default)]
    pub prompts: Vec<PromptDescriptor>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: ToolDescriptor) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_resource(mut self, resource: ResourceDescriptor) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn with_prompt(mut self, prompt: PromptDescriptor) -> Self {
        self.prompts.push(prompt);
        self
    }

    /// Stamp every descriptor with the owning backend's name.
    pub fn with_backend(mut self, backend: &str) -> Self {
        for tool in &mut self.tools {
            tool.backend = backend.to_string();
        }
        for resource in &mut self.resources {
            resource.backend = backend.to_string();
        }
        for prompt in &mut self.prompts {
            prompt.backend = backend.to_string();
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.resources.is_empty() && self.prompts.is_empty()
    }
}
