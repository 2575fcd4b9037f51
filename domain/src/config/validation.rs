//! Validation of the configured backend list.
//!
//! Returns structured issues with severity levels instead of failing on
//! the first problem, so the loader can report everything at once.

use crate::backend::config::{BackendConfig, TransportKind};
use crate::capability::qualified::validate_backend_name;
use std::collections::HashSet;

/// Severity level of a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Fatal: the configuration cannot work at all.
    Error,
    /// Non-fatal: the configuration works but may not behave as expected.
    Warning,
}

/// Identifies a specific configuration issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssueCode {
    /// Two backends share a name.
    DuplicateBackend { name: String },
    /// A backend name is empty or contains a reserved character.
    InvalidBackendName { name: String },
    /// A backend has no endpoint.
    EmptyEndpoint { backend: String },
    /// A limit that must be positive is zero.
    ZeroLimit { field: String },
    /// No backend is enabled.
    NoEnabledBackends,
}

/// A detected issue in the configuration.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: Severity,
    pub code: ConfigIssueCode,
    pub message: String,
}

impl ConfigIssue {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Check names, endpoints and uniqueness of the backend list.
pub fn validate_backends(backends: &[BackendConfig]) -> Vec<ConfigIssue> {
    let mut issues = Vec::new();
    let mut seen = HashSet::new();

    for backend in backends {
        if validate_backend_name(&backend.name).is_err() {
            issues.push(ConfigIssue {
                severity: Severity::Error,
                code: ConfigIssueCode::InvalidBackendName {
                    name: backend.name.clone(),
                },
                message: format!(
                    "backend name '{}' must be non-empty and use only letters, digits, '-' or '_'",
                    backend.name
                ),
            });
        }

        if !seen.insert(backend.name.as_str()) {
            issues.push(ConfigIssue {
                severity: Severity::Error,
                code: ConfigIssueCode::DuplicateBackend {
                    name: backend.name.clone(),
                },
                message: format!("backend '{}' is configured more than once", backend.name),
            });
        }

        if backend.endpoint.trim().is_empty() {
            let hint = match backend.transport {
                TransportKind::Tcp => "a host:port address",
                TransportKind::Stdio => "a program to spawn",
            };
            issues.push(ConfigIssue {
                severity: Severity::Error,
                code: ConfigIssueCode::EmptyEndpoint {
                    backend: backend.name.clone(),
                },
                message: format!("backend '{}' needs an endpoint ({})", backend.name, hint),
            });
        }
    }

    if !backends.is_empty() && backends.iter().all(|b| !b.enabled) {
        issues.push(ConfigIssue {
            severity: Severity::Warning,
            code: ConfigIssueCode::NoEnabledBackends,
            message: "every configured backend is disabled".to_string(),
        });
    }

    issues
}

/// Report a zero value for a limit that must be positive.
pub fn require_positive(field: &str, value: u64) -> Option<ConfigIssue> {
    (value == 0).then(|| ConfigIssue {
        severity: Severity::Error,
        code: ConfigIssueCode::ZeroLimit {
            field: field.to_string(),
        },
        message: format!("{} must be greater than zero", field),
    })
}
