//! Error taxonomy for invocations.
//!
//! Every failure an agent can observe maps to exactly one [`ErrorKind`].
//! The kind strings are stable and part of the agent-facing envelope.
//!
//! | Kind | Retried by gateway? |
//! |------|---------------------|
//! | `unknown_tool` / `unknown_resource` | No |
//! | `invalid_arguments` | No |
//! | `backend_unavailable` | No (caller may retry after backoff) |
//! | `timeout` | No |
//! | `execution_error` | Only `rate_limited` and `internal`, bounded |
//! | `backend_disconnected` | No |
//!
//! [`ExecutionError`] is the backend-side counterpart: the closed set a
//! tool executor translates every wrapped-system failure into.

use crate::backend::state::ConnectionState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A single argument that failed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    /// JSON pointer to the offending field (`""` for the whole document).
    pub path: String,
    /// The schema keyword that was violated (`required`, `type`, ...).
    pub constraint: String,
    pub message: String,
}

impl SchemaViolation {
    pub fn new(
        path: impl Into<String>,
        constraint: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            constraint: constraint.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{} ({}): {}", path, self.constraint, self.message)
    }
}

fn join_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Sub-kinds of a wrapped system's failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    AuthFailure,
    NotFound,
    Conflict,
    RateLimited,
    Internal,
}

impl ExecutionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionErrorKind::AuthFailure => "auth_failure",
            ExecutionErrorKind::NotFound => "not_found",
            ExecutionErrorKind::Conflict => "conflict",
            ExecutionErrorKind::RateLimited => "rate_limited",
            ExecutionErrorKind::Internal => "internal",
        }
    }

    /// Kinds the connection layer retries with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutionErrorKind::RateLimited | ExecutionErrorKind::Internal
        )
    }

    /// Classify an HTTP-like status code from a wrapped system's client.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ExecutionErrorKind::AuthFailure,
            404 | 410 => ExecutionErrorKind::NotFound,
            409 | 412 => ExecutionErrorKind::Conflict,
            429 => ExecutionErrorKind::RateLimited,
            _ => ExecutionErrorKind::Internal,
        }
    }
}

impl std::str::FromStr for ExecutionErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auth_failure" => Ok(ExecutionErrorKind::AuthFailure),
            "not_found" => Ok(ExecutionErrorKind::NotFound),
            "conflict" => Ok(ExecutionErrorKind::Conflict),
            "rate_limited" => Ok(ExecutionErrorKind::RateLimited),
            "internal" => Ok(ExecutionErrorKind::Internal),
            other => Err(format!("unknown execution error kind: {}", other)),
        }
    }
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-side execution failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments: {}", join_violations(.0))]
    InvalidArguments(Vec<SchemaViolation>),

    #[error("{kind}: {message}")]
    Failed {
        kind: ExecutionErrorKind,
        message: String,
    },
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        ExecutionError::Failed {
            kind,
            message: message.into(),
        }
    }

    pub fn auth_failure(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::AuthFailure, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Conflict, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::RateLimited, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Internal, message)
    }

    /// Translate a status-coded failure from a wrapped system's client.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::from_status(status), message)
    }

    /// The execution sub-kind, if this is a wrapped-system failure.
    pub fn kind(&self) -> Option<ExecutionErrorKind> {
        match self {
            ExecutionError::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ExecutionError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => ExecutionError::not_found(e.to_string()),
            std::io::ErrorKind::PermissionDenied => ExecutionError::auth_failure(e.to_string()),
            _ => ExecutionError::internal(e.to_string()),
        }
    }
}

/// Stable top-level classification of a gateway failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownTool,
    UnknownResource,
    InvalidArguments,
    BackendUnavailable,
    Timeout,
    ExecutionError,
    BackendDisconnected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownTool => "unknown_tool",
            ErrorKind::UnknownResource => "unknown_resource",
            ErrorKind::InvalidArguments => "invalid_arguments",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ExecutionError => "execution_error",
            ErrorKind::BackendDisconnected => "backend_disconnected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every failure the gateway reports to the agent layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("no backend advertises '{name}'")]
    UnknownTool { name: String },

    #[error("no backend serves resource '{uri}'")]
    UnknownResource { uri: String },

    #[error("invalid arguments for '{tool}': {}", join_violations(.violations))]
    InvalidArguments {
        tool: String,
        violations: Vec<SchemaViolation>,
    },

    #[error("backend '{backend}' is unavailable ({state})")]
    BackendUnavailable {
        backend: String,
        state: ConnectionState,
    },

    #[error("'{target}' on backend '{backend}' timed out after {}ms", .after.as_millis())]
    Timeout {
        backend: String,
        target: String,
        after: Duration,
    },

    #[error("backend '{backend}' reported {kind}: {message}")]
    Execution {
        backend: String,
        kind: ExecutionErrorKind,
        message: String,
    },

    #[error("backend '{backend}' disconnected: {message}")]
    BackendDisconnected { backend: String, message: String },
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::UnknownTool { .. } => ErrorKind::UnknownTool,
            GatewayError::UnknownResource { .. } => ErrorKind::UnknownResource,
            GatewayError::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            GatewayError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            GatewayError::Timeout { .. } => ErrorKind::Timeout,
            GatewayError::Execution { .. } => ErrorKind::ExecutionError,
            GatewayError::BackendDisconnected { .. } => ErrorKind::BackendDisconnected,
        }
    }

    /// The sub-kind of an execution error.
    pub fn execution_kind(&self) -> Option<ExecutionErrorKind> {
        match self {
            GatewayError::Execution { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The backend the failure is attributed to, if any.
    pub fn backend(&self) -> Option<&str> {
        match self {
            GatewayError::BackendUnavailable { backend, .. }
            | GatewayError::Timeout { backend, .. }
            | GatewayError::Execution { backend, .. }
            | GatewayError::BackendDisconnected { backend, .. } => Some(backend),
            _ => None,
        }
    }

    /// Whether the connection layer may retry this failure itself.
    pub fn is_retryable(&self) -> bool {
        self.execution_kind().is_some_and(|k| k.is_retryable())
    }

    /// Attach a backend-side execution error to the backend it came from.
    pub fn from_execution(backend: &str, tool: &str, error: ExecutionError) -> Self {
        match error {
            ExecutionError::UnknownTool(name) => GatewayError::Execution {
                backend: backend.to_string(),
                kind: ExecutionErrorKind::NotFound,
                message: format!("backend no longer provides tool '{}'", name),
            },
            ExecutionError::InvalidArguments(violations) => GatewayError::InvalidArguments {
                tool: tool.to_string(),
                violations,
            },
            ExecutionError::Failed { kind, message } => GatewayError::Execution {
                backend: backend.to_string(),
                kind,
                message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        let err = GatewayError::UnknownTool {
            name: "foo".to_string(),
        };
        assert_eq!(err.kind().as_str(), "unknown_tool");
        assert_eq!(
            serde_json::to_value(ErrorKind::BackendDisconnected).unwrap(),
            "backend_disconnected"
        );
        assert_eq!(
            serde_json::to_value(ExecutionErrorKind::RateLimited).unwrap(),
            "rate_limited"
        );
    }

    #[test]
    fn test_only_rate_limited_and_internal_are_retryable() {
        let exec = |kind| GatewayError::Execution {
            backend: "ci".to_string(),
            kind,
            message: String::new(),
        };
        assert!(exec(ExecutionErrorKind::RateLimited).is_retryable());
        assert!(exec(ExecutionErrorKind::Internal).is_retryable());
        assert!(!exec(ExecutionErrorKind::AuthFailure).is_retryable());
        assert!(!exec(ExecutionErrorKind::Conflict).is_retryable());
        assert!(
            !GatewayError::Timeout {
                backend: "ci".to_string(),
                target: "build".to_string(),
                after: Duration::from_secs(1),
            }
            .is_retryable()
        );
        assert!(
            !GatewayError::BackendUnavailable {
                backend: "ci".to_string(),
                state: ConnectionState::Degraded,
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(ExecutionErrorKind::from_status(401), ExecutionErrorKind::AuthFailure);
        assert_eq!(ExecutionErrorKind::from_status(403), ExecutionErrorKind::AuthFailure);
        assert_eq!(ExecutionErrorKind::from_status(404), ExecutionErrorKind::NotFound);
        assert_eq!(ExecutionErrorKind::from_status(409), ExecutionErrorKind::Conflict);
        assert_eq!(ExecutionErrorKind::from_status(429), ExecutionErrorKind::RateLimited);
        assert_eq!(ExecutionErrorKind::from_status(503), ExecutionErrorKind::Internal);
    }

    #[test]
    fn test_invalid_arguments_message_lists_violations() {
        let err = GatewayError::InvalidArguments {
            tool: "list_jobs".to_string(),
            violations: vec![SchemaViolation::new("/folder", "required", "missing")],
        };
        assert_eq!(
            err.to_string(),
            "invalid arguments for 'list_jobs': /folder (required): missing"
        );
    }

    #[test]
    fn test_from_execution_maps_invalid_arguments() {
        let err = GatewayError::from_execution(
            "ci",
            "list_jobs",
            ExecutionError::InvalidArguments(vec![SchemaViolation::new("", "type", "bad")]),
        );
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);

        let err = GatewayError::from_execution("ci", "build", ExecutionError::conflict("running"));
        assert_eq!(err.execution_kind(), Some(ExecutionErrorKind::Conflict));
        assert_eq!(err.backend(), Some("ci"));
    }

    #[test]
    fn test_io_error_translation() {
        let err: ExecutionError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), Some(ExecutionErrorKind::NotFound));
        let err: ExecutionError = std::io::Error::other("boom").into();
        assert_eq!(err.kind(), Some(ExecutionErrorKind::Internal));
    }
}
