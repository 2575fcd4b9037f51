//! Backend-side tool executor.
//!
//! Validates every call against the tool's declared schema before the
//! handler runs, so a schema violation never reaches the wrapped system.
//! Handlers run in their own task; a panic or abort becomes an `internal`
//! execution error instead of tearing down the connection.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::task::JoinHandle;
use toolgate_domain::{
    ArgumentValidator, BasicArgumentValidator, CapabilitySet, DomainError, ExecutionError,
    RenderedPrompt, ResourceContent, ResourceDescriptor, ToolDescriptor, UriTemplate,
    capability::uri_template::best_match,
};
use tracing::debug;

use super::operations::OperationTracker;
use super::registration::{ProgressSink, PromptTemplate, ResourceHandler, ToolHandler};

/// Built-in liveness tool.
pub const HEALTH_CHECK_TOOL: &str = "health_check";
/// Built-in status query for long-running operations.
pub const OPERATION_STATUS_TOOL: &str = "operation_status";

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

struct RegisteredResource {
    descriptor: ResourceDescriptor,
    template: UriTemplate,
    handler: Arc<dyn ResourceHandler>,
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct ToolExecutor {
    name: String,
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
    resources: Vec<RegisteredResource>,
    prompts: Vec<PromptTemplate>,
    validator: Arc<dyn ArgumentValidator>,
    operations: Arc<OperationTracker>,
}

impl ToolExecutor {
    /// Create an executor for the backend `name`, with the built-in
    /// `health_check` and `operation_status` tools registered.
    pub fn new(name: impl Into<String>) -> Self {
        let mut executor = Self {
            name: name.into(),
            tools: Vec::new(),
            index: HashMap::new(),
            resources: Vec::new(),
            prompts: Vec::new(),
            validator: Arc::new(BasicArgumentValidator),
            operations: Arc::new(OperationTracker::new()),
        };
        executor.register_builtins();
        executor
    }

    pub fn with_validator(mut self, validator: Arc<dyn ArgumentValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operations(&self) -> &Arc<OperationTracker> {
        &self.operations
    }

    fn register_builtins(&mut self) {
        // Builtins are answered inline by `execute`; these entries only
        // advertise them and carry their schemas.
        let noop: Arc<dyn ToolHandler> =
            super::registration::tool_fn(|_args, _progress| async { Ok(Value::Null) });
        for descriptor in [
            ToolDescriptor::new(
                "",
                HEALTH_CHECK_TOOL,
                json!({"type": "object", "properties": {}}),
            )
            .with_description("Report backend liveness and registered tool count"),
            ToolDescriptor::new(
                "",
                OPERATION_STATUS_TOOL,
                json!({
                    "type": "object",
                    "properties": {"handle": {"type": "string"}},
                    "required": ["handle"],
                }),
            )
            .with_description("Progress and outcome of a long-running operation"),
        ] {
            self.index.insert(descriptor.name.clone(), self.tools.len());
            self.tools.push(RegisteredTool {
                descriptor,
                handler: Arc::clone(&noop),
            });
        }
    }

    // ==================== Registration ====================

    pub fn register_tool(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), DomainError> {
        let name = descriptor.name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(DomainError::InvalidToolName(descriptor.name.clone()));
        }
        if self.index.contains_key(&descriptor.name) {
            return Err(DomainError::InvalidToolName(format!(
                "{} (already registered)",
                descriptor.name
            )));
        }
        self.index.insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            descriptor,
            handler,
        });
        Ok(())
    }

    pub fn register_resource(
        &mut self,
        descriptor: ResourceDescriptor,
        handler: Arc<dyn ResourceHandler>,
    ) -> Result<(), DomainError> {
        let template = UriTemplate::parse(&descriptor.uri_template)?;
        self.resources.push(RegisteredResource {
            descriptor,
            template,
            handler,
        });
        Ok(())
    }

    pub fn register_prompt(&mut self, prompt: PromptTemplate) -> Result<(), DomainError> {
        if self.prompts.iter().any(|p| p.name() == prompt.name()) {
            return Err(DomainError::InvalidToolName(format!(
                "{} (prompt already registered)",
                prompt.name()
            )));
        }
        self.prompts.push(prompt);
        Ok(())
    }

    /// Everything this backend advertises during discovery.
    pub fn capabilities(&self) -> CapabilitySet {
        CapabilitySet {
            tools: self.tools.iter().map(|t| t.descriptor.clone()).collect(),
            resources: self.resources.iter().map(|r| r.descriptor.clone()).collect(),
            prompts: self.prompts.iter().map(|p| p.descriptor.clone()).collect(),
        }
    }

    // ==================== Execution ====================

    /// Validate and run one tool call.
    pub async fn execute(
        &self,
        tool: &str,
        arguments: Value,
        progress: ProgressSink,
    ) -> Result<Value, ExecutionError> {
        let registered = self
            .index
            .get(tool)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| ExecutionError::UnknownTool(tool.to_string()))?;

        self.validator
            .validate(&registered.descriptor, &arguments)
            .map_err(ExecutionError::InvalidArguments)?;

        match tool {
            HEALTH_CHECK_TOOL => return Ok(self.health()),
            OPERATION_STATUS_TOOL => {
                let handle = arguments
                    .get("handle")
                    .and_then(|h| h.as_str())
                    .unwrap_or_default();
                let status = self.operations.status(handle)?;
                return serde_json::to_value(status)
                    .map_err(|e| ExecutionError::internal(e.to_string()));
            }
            _ => {}
        }

        let handler = Arc::clone(&registered.handler);

        if registered.descriptor.long_running {
            let handle = self.operations.start(tool, handler, arguments);
            debug!(tool = %tool, handle = %handle, "Long-running operation accepted");
            // Every backend advertises the status builtin, so point the
            // caller at the qualified name that reaches this one.
            return Ok(json!({
                "handle": handle,
                "status": "accepted",
                "status_tool": format!("{}.{}", self.name, OPERATION_STATUS_TOOL),
            }));
        }

        let mut task = AbortOnDrop(tokio::spawn(async move {
            handler.call(arguments, progress).await
        }));
        match (&mut task.0).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => Err(ExecutionError::internal(format!(
                "tool '{}' panicked",
                tool
            ))),
            Err(e) => Err(ExecutionError::internal(format!("tool '{}' aborted: {}", tool, e))),
        }
    }

    /// Read the resource whose template best matches `uri`.
    pub async fn read_resource(&self, uri: &str) -> Result<ResourceContent, ExecutionError> {
        let (resource, params) = best_match(
            self.resources.iter().map(|r| (&r.template, r)),
            uri,
        )
        .ok_or_else(|| ExecutionError::not_found(format!("no resource matches '{}'", uri)))?;

        let mut content = resource.handler.read(uri, params).await?;
        if content.mime_type.is_none() {
            content.mime_type = resource.descriptor.mime_type.clone();
        }
        Ok(content)
    }

    pub fn get_prompt(&self, name: &str, arguments: &Value) -> Result<RenderedPrompt, ExecutionError> {
        self.prompts
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| ExecutionError::UnknownTool(name.to_string()))?
            .render(arguments)
    }

    fn health(&self) -> Value {
        json!({
            "backend": self.name,
            "status": "ok",
            "tools": self.tools.len(),
            "resources": self.resources.len(),
            "prompts": self.prompts.len(),
            "running_operations": self.operations.running(),
        })
    }
}
