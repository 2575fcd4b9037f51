//! Port for structured call auditing.
//!
//! Defines the [`CallLogger`] trait for recording routed calls (tool
//! invocations, resource fetches, prompt renders) to a machine-readable log.
//!
//! This is separate from `tracing`-based operation logs: tracing handles
//! human-readable diagnostics, while this port captures one record per call
//! with its backend, duration and outcome. Arguments are never part of a
//! record.

use serde_json::Value;

/// A structured call event for logging.
pub struct CallEvent {
    /// Event type identifier (e.g., "tool_invoked", "tool_failed").
    pub event_type: &'static str,
    /// JSON payload with event-specific data.
    pub payload: Value,
}

impl CallEvent {
    pub fn new(event_type: &'static str, payload: Value) -> Self {
        Self {
            event_type,
            payload,
        }
    }
}

/// Port for logging call events.
///
/// `log` is synchronous and non-fallible; logging failures are ignored so
/// they never affect a call's outcome.
pub trait CallLogger: Send + Sync {
    fn log(&self, event: CallEvent);
}

/// No-op implementation for tests and when call logging is disabled.
pub struct NoCallLogger;

impl CallLogger for NoCallLogger {
    fn log(&self, _event: CallEvent) {}
}
