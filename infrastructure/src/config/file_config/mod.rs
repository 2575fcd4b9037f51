//! Raw TOML configuration data types
//!
//! These structs represent the exact structure of the TOML config file.
//! They are deserialized directly and converted into application
//! parameters and domain backend configs.

mod backends;
mod gateway;
mod logging;
mod session;

pub use backends::FileBackendConfig;
pub use gateway::FileGatewayConfig;
pub use logging::FileLoggingConfig;
pub use session::FileSessionConfig;

use serde::{Deserialize, Serialize};
use toolgate_domain::{BackendConfig, ConfigIssue, validate_backends};

/// Complete file configuration (raw TOML structure)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Timeouts, concurrency and backoff
    pub gateway: FileGatewayConfig,
    /// Session retention
    pub session: FileSessionConfig,
    /// Diagnostic and call logs
    pub logging: FileLoggingConfig,
    /// Backends in priority order; earlier entries win name collisions
    pub backends: Vec<FileBackendConfig>,
}

impl FileConfig {
    /// Validate the entire configuration, returning all detected issues.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        issues.extend(validate_backends(&self.backend_configs()));
        issues.extend(self.gateway.validate());
        issues.extend(self.session.validate());
        issues
    }

    /// Backends in configuration order, disabled ones included.
    pub fn backend_configs(&self) -> Vec<BackendConfig> {
        self.backends
            .iter()
            .map(FileBackendConfig::to_backend_config)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolgate_domain::{ConfigIssueCode, TransportKind};

    #[test]
    fn test_deserialize_full_config() {
        let toml_str = r#"
[gateway]
call_timeout_secs = 12
max_in_flight = 4

[session]
idle_timeout_secs = 600

[logging]
call_log = "/tmp/toolgate-calls.jsonl"

[[backends]]
name = "k8s"
endpoint = "127.0.0.1:7401"
description = "Cluster operations"

[[backends]]
name = "ci"
transport = "stdio"
endpoint = "ci-backend"
args = ["--region", "eu"]
enabled = false
params = { token = "secret" }
"#;

        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.gateway.call_timeout_secs, 12);
        assert_eq!(config.gateway.max_in_flight, 4);
        assert_eq!(config.session.idle_timeout_secs, 600);
        assert!(config.logging.call_log.is_some());
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[1].transport, TransportKind::Stdio);
        assert!(!config.backends[1].enabled);
        assert!(config.validate().is_empty());

        let backends = config.backend_configs();
        assert_eq!(backends[0].name, "k8s");
        assert!(backends[0].enabled);
        assert_eq!(backends[1].params.get("token").map(String::as_str), Some("secret"));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: FileConfig = toml::from_str("[gateway]\nmax_retries = 0\n").unwrap();
        assert_eq!(config.gateway.max_retries, 0);
        assert_eq!(config.gateway.call_timeout_secs, 30);
        assert!(config.backends.is_empty());
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let toml_str = r#"
[gateway]
max_in_flight = 0

[[backends]]
name = "ci.prod"
endpoint = "localhost:1"

[[backends]]
name = "k8s"
endpoint = ""

[[backends]]
name = "k8s"
endpoint = "localhost:2"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        let codes: Vec<_> = config.validate().into_iter().map(|i| i.code).collect();
        assert!(codes.contains(&ConfigIssueCode::InvalidBackendName {
            name: "ci.prod".to_string()
        }));
        assert!(codes.contains(&ConfigIssueCode::EmptyEndpoint {
            backend: "k8s".to_string()
        }));
        assert!(codes.contains(&ConfigIssueCode::DuplicateBackend {
            name: "k8s".to_string()
        }));
        assert!(codes.contains(&ConfigIssueCode::ZeroLimit {
            field: "gateway.max_in_flight".to_string()
        }));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(FileConfig::default().validate().is_empty());
    }
}
