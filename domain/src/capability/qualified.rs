//! Backend-qualified capability names.
//!
//! Every tool and prompt is globally addressable as `<backend>.<name>`.
//! Backend names may not contain `.`, so the first dot always separates
//! the backend from the capability name even when the name itself
//! contains dots.

use crate::core::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between the backend name and the capability name.
pub const QUALIFIER_SEPARATOR: char = '.';

/// Validate a backend name.
///
/// Allowed characters are ASCII letters, digits, `-` and `_`.
pub fn validate_backend_name(name: &str) -> Result<(), DomainError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DomainError::InvalidBackendName(name.to_string()))
    }
}

/// A `(backend, name)` pair that identifies one capability globally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QualifiedName {
    backend: String,
    name: String,
}

impl QualifiedName {
    pub fn new(backend: impl Into<String>, name: impl Into<String>) -> Result<Self, DomainError> {
        let backend = backend.into();
        let name = name.into();
        validate_backend_name(&backend)?;
        if name.trim().is_empty() {
            return Err(DomainError::InvalidToolName(name));
        }
        Ok(Self { backend, name })
    }

    /// Parse `<backend>.<name>`.
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let (backend, name) = s
            .split_once(QUALIFIER_SEPARATOR)
            .ok_or_else(|| DomainError::InvalidQualifiedName(s.to_string()))?;
        Self::new(backend, name).map_err(|_| DomainError::InvalidQualifiedName(s.to_string()))
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.backend, QUALIFIER_SEPARATOR, self.name)
    }
}

impl TryFrom<String> for QualifiedName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<QualifiedName> for String {
    fn from(value: QualifiedName) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let q = QualifiedName::parse("jenkins.list_jobs").unwrap();
        assert_eq!(q.backend(), "jenkins");
        assert_eq!(q.name(), "list_jobs");
        assert_eq!(q.to_string(), "jenkins.list_jobs");
    }

    #[test]
    fn test_name_may_contain_dots() {
        let q = QualifiedName::parse("k8s.pods.list").unwrap();
        assert_eq!(q.backend(), "k8s");
        assert_eq!(q.name(), "pods.list");
    }

    #[test]
    fn test_parse_rejects_unqualified() {
        assert_eq!(
            QualifiedName::parse("list_jobs"),
            Err(DomainError::InvalidQualifiedName("list_jobs".to_string()))
        );
        assert!(QualifiedName::parse(".list_jobs").is_err());
        assert!(QualifiedName::parse("jenkins.").is_err());
    }

    #[test]
    fn test_backend_name_rules() {
        assert!(validate_backend_name("ci-prod_2").is_ok());
        assert!(validate_backend_name("").is_err());
        assert!(validate_backend_name("ci.prod").is_err());
        assert!(validate_backend_name("ci prod").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let q = QualifiedName::new("k8s", "list_pods").unwrap();
        let json = serde_json::to_string(&q).unwrap();
        assert_eq!(json, "\"k8s.list_pods\"");
        let back: QualifiedName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, q);
    }
}
