//! Application layer for toolgate
//!
//! This crate contains the capability registry, the dispatcher, port
//! definitions and application configuration. It depends only on the
//! domain layer.

pub mod config;
pub mod ports;
pub mod registry;
pub mod use_cases;

// Re-export commonly used types
pub use config::{ConnectionParams, DispatchParams, MIN_HEALTH_INTERVAL};
pub use ports::{
    backend_connection::{BackendConnection, BackendStatus, ChunkSender},
    call_logger::{CallEvent, CallLogger, NoCallLogger},
    session_store::SessionStore,
};
pub use registry::{CapabilityRegistry, RebuildOutcome};
pub use use_cases::dispatch::{
    CapabilityListing, Dispatcher, ErrorEnvelope, InvocationStream, InvokeRequest, InvokeResponse,
};
