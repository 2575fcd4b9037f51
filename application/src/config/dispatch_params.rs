//! Dispatch parameters: per-call limits and session recording.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters that control [`Dispatcher`](crate::use_cases::dispatch::Dispatcher).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchParams {
    /// Deadline applied when the caller does not supply one.
    pub default_timeout: Duration,
    /// Upper bound on any caller-supplied deadline.
    pub max_timeout: Duration,
    /// Maximum bytes of a result kept in a session turn.
    pub record_max_bytes: usize,
    /// Buffer size of a streamed invocation's event channel.
    pub stream_buffer: usize,
}

impl Default for DispatchParams {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(300),
            record_max_bytes: 2048,
            stream_buffer: 64,
        }
    }
}

impl DispatchParams {
    // ==================== Builder Methods ====================

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = timeout;
        self
    }

    pub fn with_record_max_bytes(mut self, bytes: usize) -> Self {
        self.record_max_bytes = bytes;
        self
    }

    pub fn with_stream_buffer(mut self, size: usize) -> Self {
        self.stream_buffer = size.max(1);
        self
    }

    /// The deadline to use for a call, given the caller's request.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout)
    }
}
