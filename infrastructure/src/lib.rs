//! Infrastructure layer for toolgate
//!
//! This crate contains adapters that implement the ports defined in the
//! application layer: backend connections over JSON-RPC, the backend-side
//! executor and server, the session store, schema validation, call
//! logging and configuration file loading.

pub mod backend;
pub mod config;
pub mod logging;
pub mod rpc;
pub mod schema;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use backend::{BackendPool, RemoteBackend};
pub use config::{ConfigError, ConfigLoader, FileConfig};
pub use logging::JsonlCallLogger;
pub use rpc::error::TransportError;
pub use schema::JsonSchemaValidator;
pub use server::{
    BackendServer, ProgressSink, PromptTemplate, ServerHandle, ToolExecutor, resource_fn, tool_fn,
};
pub use session::{InMemorySessionStore, spawn_sweeper};
