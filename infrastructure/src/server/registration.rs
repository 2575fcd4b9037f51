//! What a backend registers with its executor: tool handlers, resource
//! handlers and prompt templates.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use toolgate_domain::{
    ExecutionError, PromptDescriptor, RenderedPrompt, ResourceContent, SchemaViolation,
};

/// Receiver for incremental output of one call.
///
/// Disabled sinks drop every chunk, so handlers can report progress
/// unconditionally.
#[derive(Clone, Default)]
pub struct ProgressSink {
    emit: Option<Arc<dyn Fn(Value) + Send + Sync>>,
}

impl ProgressSink {
    pub fn new(emit: impl Fn(Value) + Send + Sync + 'static) -> Self {
        Self {
            emit: Some(Arc::new(emit)),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.emit.is_some()
    }

    pub fn send(&self, chunk: Value) {
        if let Some(emit) = &self.emit {
            emit(chunk);
        }
    }
}

/// One operation against the wrapped system.
///
/// Arguments have already been validated against the tool's schema.
/// Every failure must be translated into an [`ExecutionError`].
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value, progress: ProgressSink) -> Result<Value, ExecutionError>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnTool<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(Value, ProgressSink) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send,
{
    async fn call(&self, arguments: Value, progress: ProgressSink) -> Result<Value, ExecutionError> {
        (self.0)(arguments, progress).await
    }
}

/// Shorthand for `Arc::new(FnTool(f))`.
pub fn tool_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value, ProgressSink) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send + 'static,
{
    Arc::new(FnTool(f))
}

/// Reads one resource kind. `params` are the values bound by the URI
/// template's placeholders.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn read(
        &self,
        uri: &str,
        params: HashMap<String, String>,
    ) -> Result<ResourceContent, ExecutionError>;
}

/// Adapts an async closure into a [`ResourceHandler`].
pub struct FnResource<F>(F);

#[async_trait]
impl<F, Fut> ResourceHandler for FnResource<F>
where
    F: Fn(String, HashMap<String, String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ResourceContent, ExecutionError>> + Send,
{
    async fn read(
        &self,
        uri: &str,
        params: HashMap<String, String>,
    ) -> Result<ResourceContent, ExecutionError> {
        (self.0)(uri.to_string(), params).await
    }
}

pub fn resource_fn<F, Fut>(f: F) -> Arc<dyn ResourceHandler>
where
    F: Fn(String, HashMap<String, String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResourceContent, ExecutionError>> + Send + 'static,
{
    Arc::new(FnResource(f))
}

/// A prompt template with `{{argument}}` placeholders.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub descriptor: PromptDescriptor,
    pub template: String,
}

impl PromptTemplate {
    pub fn new(descriptor: PromptDescriptor, template: impl Into<String>) -> Self {
        Self {
            descriptor,
            template: template.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Substitute arguments. Missing required arguments are rejected;
    /// missing optional ones render as empty.
    pub fn render(&self, arguments: &Value) -> Result<RenderedPrompt, ExecutionError> {
        let provided = arguments.as_object();
        let mut violations = Vec::new();
        let mut text = self.template.clone();

        for argument in &self.descriptor.arguments {
            let value = provided.and_then(|o| o.get(&argument.name));
            let rendered = match value {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => {
                    if argument.required {
                        violations.push(SchemaViolation::new(
                            format!("/{}", argument.name),
                            "required",
                            format!("missing required argument '{}'", argument.name),
                        ));
                    }
                    String::new()
                }
                Some(other) => other.to_string(),
            };
            text = text.replace(&format!("{{{{{}}}}}", argument.name), &rendered);
        }

        if !violations.is_empty() {
            return Err(ExecutionError::InvalidArguments(violations));
        }

        Ok(RenderedPrompt {
            backend: String::new(),
            name: self.descriptor.name.clone(),
            description: self.descriptor.description.clone(),
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use toolgate_domain::PromptArgument;

    fn template() -> PromptTemplate {
        PromptTemplate::new(
            PromptDescriptor::new("", "triage")
                .with_argument(PromptArgument::required("job", "Failing job"))
                .with_argument(PromptArgument::optional("branch", "Branch name")),
            "Investigate {{job}} on {{branch}}.",
        )
    }

    #[test]
    fn test_render_substitutes_arguments() {
        let rendered = template()
            .render(&json!({"job": "build-42", "branch": "main"}))
            .unwrap();
        assert_eq!(rendered.text, "Investigate build-42 on main.");
        assert_eq!(rendered.name, "triage");
    }

    #[test]
    fn test_optional_argument_renders_empty() {
        let rendered = template().render(&json!({"job": 7})).unwrap();
        assert_eq!(rendered.text, "Investigate 7 on .");
    }

    #[test]
    fn test_missing_required_argument_rejected() {
        let err = template().render(&json!({})).unwrap_err();
        match err {
            ExecutionError::InvalidArguments(v) => {
                assert_eq!(v[0].path, "/job");
                assert_eq!(v[0].constraint, "required");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_progress_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            ProgressSink::new(move |v| seen.lock().unwrap().push(v))
        };
        assert!(sink.is_enabled());
        sink.send(json!(1));
        sink.clone().send(json!(2));
        ProgressSink::disabled().send(json!(3));
        assert_eq!(*seen.lock().unwrap(), vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_fn_tool_adapter() {
        let handler = tool_fn(|args, _progress| async move { Ok(json!({"echo": args})) });
        let out = handler.call(json!({"a": 1}), ProgressSink::disabled()).await.unwrap();
        assert_eq!(out, json!({"echo": {"a": 1}}));
    }
}
