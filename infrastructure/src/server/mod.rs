//! Backend-side library: everything a backend process needs to expose a
//! wrapped system to the gateway.
//!
//! - [`executor::ToolExecutor`] - registered tools, resources and prompts
//! - [`server::BackendServer`] - JSON-RPC serving over TCP or stdio
//! - [`operations::OperationTracker`] - long-running operation handles

pub mod executor;
pub mod operations;
pub mod registration;
#[allow(clippy::module_inception)]
pub mod server;

pub use executor::{HEALTH_CHECK_TOOL, OPERATION_STATUS_TOOL, ToolExecutor};
pub use operations::{OperationState, OperationStatus, OperationTracker};
pub use registration::{
    FnResource, FnTool, ProgressSink, PromptTemplate, ResourceHandler, ToolHandler, resource_fn,
    tool_fn,
};
pub use server::{BackendServer, ServerHandle};
