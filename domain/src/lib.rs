//! Domain layer for toolgate
//!
//! This crate contains the pure data and policy of the tool gateway.
//! It has no dependencies on async runtimes, networking or configuration
//! loading.
//!
//! # Core Concepts
//!
//! ## Capabilities
//!
//! Backends advertise **tools** (schema-described operations), **resources**
//! (URI-addressed state) and **prompt templates**. The gateway merges them
//! into one [`Catalog`] where every capability is reachable by its
//! backend-qualified name and bare names resolve to the earliest configured
//! backend.
//!
//! ## Failures
//!
//! Every failure maps to one [`ErrorKind`] of a closed set. Backends
//! translate wrapped-system failures into [`ExecutionError`] sub-kinds so
//! retry policy is uniform across backends.

pub mod backend;
pub mod capability;
pub mod config;
pub mod core;
pub mod invocation;
pub mod session;
pub mod util;

// Re-export commonly used types
pub use backend::{
    backoff::BackoffPolicy,
    config::{BackendConfig, TransportKind},
    state::{AtomicConnectionState, ConnectionState},
};
pub use capability::{
    catalog::{Catalog, ResolvedResource, ToolListing},
    descriptor::{
        CapabilitySet, PromptArgument, PromptDescriptor, ResourceDescriptor, ToolDescriptor,
        empty_object_schema,
    },
    qualified::{QualifiedName, validate_backend_name},
    uri_template::UriTemplate,
    validation::{ArgumentValidator, BasicArgumentValidator},
};
pub use config::validation::{ConfigIssue, ConfigIssueCode, Severity, validate_backends};
pub use core::error::DomainError;
pub use invocation::{
    error::{ErrorKind, ExecutionError, ExecutionErrorKind, GatewayError, SchemaViolation},
    value_objects::{InvocationEvent, InvokeResult, RenderedPrompt, ResourceContent},
};
pub use session::entities::{Session, SessionSummary, Turn, TurnOutcome};
