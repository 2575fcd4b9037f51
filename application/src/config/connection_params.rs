//! Connection parameters: timeouts, concurrency and retry policy shared by
//! every backend connection.

use std::time::Duration;
use toolgate_domain::BackoffPolicy;

/// Floor for [`ConnectionParams::health_interval`]. A zero interval would
/// turn the probe loop into a busy loop.
pub const MIN_HEALTH_INTERVAL: Duration = Duration::from_millis(10);

/// Per-connection limits and schedules.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Bound on establishing the transport plus the handshake.
    pub connect_timeout: Duration,
    /// Bound on a discovery round trip.
    pub discovery_timeout: Duration,
    /// Interval between health probes while Ready.
    pub health_interval: Duration,
    /// Bound on a single health probe.
    pub health_timeout: Duration,
    /// Maximum simultaneous in-flight calls per backend.
    pub max_in_flight: usize,
    /// Retries for retry-safe execution errors (rate limited, internal).
    pub max_retries: u32,
    /// Delay schedule between those retries.
    pub retry_backoff: BackoffPolicy,
    /// Delay schedule between reconnect attempts.
    pub reconnect_backoff: BackoffPolicy,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(10),
            health_interval: Duration::from_secs(15),
            health_timeout: Duration::from_secs(5),
            max_in_flight: 8,
            max_retries: 2,
            retry_backoff: BackoffPolicy::new(
                Duration::from_millis(200),
                2.0,
                Duration::from_secs(2),
            ),
            reconnect_backoff: BackoffPolicy::default(),
        }
    }
}

impl ConnectionParams {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval.max(MIN_HEALTH_INTERVAL);
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.retry_backoff = policy;
        self
    }

    pub fn with_reconnect_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.reconnect_backoff = policy;
        self
    }
}
