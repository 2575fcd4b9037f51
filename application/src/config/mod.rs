//! Application-level configuration.
//!
//! - [`DispatchParams`]: per-call deadlines and session recording limits
//! - [`ConnectionParams`]: backend connection timeouts, concurrency and backoff

pub mod connection_params;
pub mod dispatch_params;

pub use connection_params::{ConnectionParams, MIN_HEALTH_INTERVAL};
pub use dispatch_params::DispatchParams;
