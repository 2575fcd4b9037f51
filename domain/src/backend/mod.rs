//! Backend domain: configuration, connection state and retry policy.

pub mod backoff;
pub mod config;
pub mod state;
