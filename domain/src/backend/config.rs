//! Static description of one configured backend.

use crate::capability::qualified::validate_backend_name;
use crate::core::error::DomainError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How the gateway reaches a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// `endpoint` is a `host:port` address.
    #[default]
    Tcp,
    /// `endpoint` is a program spawned as a child process; frames flow over
    /// its stdin/stdout.
    Stdio,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => f.write_str("tcp"),
            TransportKind::Stdio => f.write_str("stdio"),
        }
    }
}

/// One registered backend. Immutable after load.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub name: String,
    pub endpoint: String,
    pub transport: TransportKind,
    pub enabled: bool,
    pub description: String,
    /// Extra arguments for a `stdio` backend's program.
    pub args: Vec<String>,
    /// Opaque connection parameters (pre-established credentials, base URLs)
    /// handed to the backend during the handshake.
    pub params: BTreeMap<String, String>,
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        validate_backend_name(&name)?;
        Ok(Self {
            name,
            endpoint: endpoint.into(),
            transport: TransportKind::Tcp,
            enabled: true,
            description: String::new(),
            args: Vec::new(),
            params: BTreeMap::new(),
        })
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

// Parameter values may hold credentials; only keys are printed.
impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("transport", &self.transport)
            .field("enabled", &self.enabled)
            .field("description", &self.description)
            .field("args", &self.args)
            .field("params", &self.params.keys().collect::<Vec<_>>())
            .finish()
    }
}
