//! Domain error types

use thiserror::Error;

/// Domain-level errors raised while validating names and templates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid backend name '{0}': must be non-empty and use only letters, digits, '-' or '_'")]
    InvalidBackendName(String),

    #[error("Invalid tool name '{0}'")]
    InvalidToolName(String),

    #[error("Invalid qualified name '{0}': expected '<backend>.<name>'")]
    InvalidQualifiedName(String),

    #[error("Invalid URI template '{template}': {reason}")]
    InvalidUriTemplate { template: String, reason: String },

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),
}

impl DomainError {
    /// Check if this error was caused by a malformed identifier
    pub fn is_naming_error(&self) -> bool {
        matches!(
            self,
            DomainError::InvalidBackendName(_)
                | DomainError::InvalidToolName(_)
                | DomainError::InvalidQualifiedName(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_template_error_display() {
        let error = DomainError::InvalidUriTemplate {
            template: "ci://{".to_string(),
            reason: "unclosed '{'".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid URI template 'ci://{': unclosed '{'"
        );
    }

    #[test]
    fn test_is_naming_error() {
        assert!(DomainError::InvalidBackendName("a.b".to_string()).is_naming_error());
        assert!(DomainError::InvalidQualifiedName("x".to_string()).is_naming_error());
        assert!(!DomainError::UnknownBackend("ci".to_string()).is_naming_error());
    }
}
