//! Session configuration from TOML (`[session]` section)

use serde::{Deserialize, Serialize};
use std::time::Duration;
use toolgate_domain::ConfigIssue;
use toolgate_domain::config::validation::require_positive;

/// Raw session configuration from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSessionConfig {
    /// Sessions idle longer than this are evicted
    pub idle_timeout_secs: u64,
    /// Interval between eviction sweeps
    pub sweep_interval_secs: u64,
    /// Cap on the stored size of each turn's request and response
    pub max_turn_bytes: usize,
}

impl Default for FileSessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3600,
            sweep_interval_secs: 60,
            max_turn_bytes: 4096,
        }
    }
}

impl FileSessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        [
            ("session.idle_timeout_secs", self.idle_timeout_secs),
            ("session.sweep_interval_secs", self.sweep_interval_secs),
            ("session.max_turn_bytes", self.max_turn_bytes as u64),
        ]
        .into_iter()
        .filter_map(|(field, value)| require_positive(field, value))
        .collect()
    }
}
