//! Backend entries from TOML (`[[backends]]` array)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use toolgate_domain::{BackendConfig, TransportKind};

/// Raw backend entry from TOML
///
/// ```toml
/// [[backends]]
/// name = "k8s"
/// endpoint = "127.0.0.1:7401"
///
/// [[backends]]
/// name = "ci"
/// transport = "stdio"
/// endpoint = "ci-backend --region eu"
/// params = { token_env = "CI_TOKEN" }
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct FileBackendConfig {
    pub name: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl FileBackendConfig {
    /// Convert without re-validating; names are checked by
    /// [`FileConfig::validate`](super::FileConfig::validate).
    pub fn to_backend_config(&self) -> BackendConfig {
        BackendConfig {
            name: self.name.clone(),
            endpoint: self.endpoint.clone(),
            transport: self.transport,
            enabled: self.enabled,
            description: self.description.clone(),
            args: self.args.clone(),
            params: self.params.clone(),
        }
    }
}

impl std::fmt::Debug for FileBackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.to_backend_config(), f)
    }
}
