//! Gateway configuration from TOML (`[gateway]` section)

use serde::{Deserialize, Serialize};
use std::time::Duration;
use toolgate_application::{ConnectionParams, DispatchParams};
use toolgate_domain::BackoffPolicy;
use toolgate_domain::ConfigIssue;
use toolgate_domain::config::validation::require_positive;

/// Raw gateway configuration from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileGatewayConfig {
    /// Transport connect plus handshake bound
    pub connect_timeout_secs: u64,
    /// Discovery round-trip bound
    pub discovery_timeout_secs: u64,
    /// Interval between health probes of a Ready backend
    pub health_interval_secs: u64,
    pub health_timeout_secs: u64,
    /// Deadline for calls that don't specify one
    pub call_timeout_secs: u64,
    /// Upper bound on caller-specified deadlines
    pub max_call_timeout_secs: u64,
    /// Simultaneous in-flight calls per backend
    pub max_in_flight: usize,
    /// Retries of retry-safe execution errors
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_multiplier: f64,
    pub reconnect_max_secs: u64,
    /// How long the CLI waits for backends to become Ready
    pub ready_timeout_secs: u64,
    /// Bytes of a result kept in session history
    pub record_max_bytes: usize,
    /// Event buffer of a streamed call
    pub stream_buffer: usize,
}

impl Default for FileGatewayConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            discovery_timeout_secs: 10,
            health_interval_secs: 15,
            health_timeout_secs: 5,
            call_timeout_secs: 30,
            max_call_timeout_secs: 300,
            max_in_flight: 8,
            max_retries: 2,
            retry_backoff_ms: 200,
            reconnect_initial_ms: 500,
            reconnect_multiplier: 2.0,
            reconnect_max_secs: 30,
            ready_timeout_secs: 10,
            record_max_bytes: 2048,
            stream_buffer: 64,
        }
    }
}

impl FileGatewayConfig {
    pub fn connection_params(&self) -> ConnectionParams {
        let retry_initial = Duration::from_millis(self.retry_backoff_ms);
        ConnectionParams::default()
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_discovery_timeout(Duration::from_secs(self.discovery_timeout_secs))
            .with_health_interval(Duration::from_secs(self.health_interval_secs))
            .with_health_timeout(Duration::from_secs(self.health_timeout_secs))
            .with_max_in_flight(self.max_in_flight)
            .with_max_retries(self.max_retries)
            .with_retry_backoff(BackoffPolicy::new(
                retry_initial,
                2.0,
                retry_initial.saturating_mul(10),
            ))
            .with_reconnect_backoff(BackoffPolicy::new(
                Duration::from_millis(self.reconnect_initial_ms),
                self.reconnect_multiplier,
                Duration::from_secs(self.reconnect_max_secs),
            ))
    }

    pub fn dispatch_params(&self) -> DispatchParams {
        DispatchParams::default()
            .with_default_timeout(Duration::from_secs(self.call_timeout_secs))
            .with_max_timeout(Duration::from_secs(self.max_call_timeout_secs))
            .with_record_max_bytes(self.record_max_bytes)
            .with_stream_buffer(self.stream_buffer)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        [
            ("gateway.connect_timeout_secs", self.connect_timeout_secs),
            ("gateway.discovery_timeout_secs", self.discovery_timeout_secs),
            ("gateway.health_interval_secs", self.health_interval_secs),
            ("gateway.health_timeout_secs", self.health_timeout_secs),
            ("gateway.call_timeout_secs", self.call_timeout_secs),
            ("gateway.max_call_timeout_secs", self.max_call_timeout_secs),
            ("gateway.max_in_flight", self.max_in_flight as u64),
            ("gateway.reconnect_max_secs", self.reconnect_max_secs),
            ("gateway.stream_buffer", self.stream_buffer as u64),
        ]
        .into_iter()
        .filter_map(|(field, value)| require_positive(field, value))
        .collect()
    }
}
