//! Configuration file loader with multi-source merging

use super::ConfigError;
use super::file_config::FileConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Project-level config file names, checked in order.
const PROJECT_FILES: [&str; 2] = ["toolgate.toml", ".toolgate.toml"];

/// Prefix of environment overrides, e.g. `TOOLGATE_GATEWAY__MAX_IN_FLIGHT=4`.
const ENV_PREFIX: &str = "TOOLGATE_";

/// Configuration loader that handles file discovery and merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from all sources with proper priority
    ///
    /// Priority (highest to lowest):
    /// 1. `TOOLGATE_`-prefixed environment variables (`__` separates sections)
    /// 2. Explicit config path (if provided)
    /// 3. Project root: `./toolgate.toml` or `./.toolgate.toml`
    /// 4. Global: `$XDG_CONFIG_HOME/toolgate/config.toml`
    /// 5. Default values
    pub fn load(config_path: Option<&Path>) -> Result<FileConfig, ConfigError> {
        Self::figment(Self::global_config_path(), Path::new("."), config_path)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Build the file-backed layers rooted at `project_dir`.
    pub fn figment(
        global: Option<PathBuf>,
        project_dir: &Path,
        explicit: Option<&Path>,
    ) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(FileConfig::default()));

        if let Some(global_path) = global
            && global_path.exists()
        {
            debug!(path = %global_path.display(), "Loading global config");
            figment = figment.merge(Toml::file(global_path));
        }

        if let Some(path) = Self::project_config_path(project_dir) {
            debug!(path = %path.display(), "Loading project config");
            figment = figment.merge(Toml::file(path));
        }

        if let Some(path) = explicit {
            debug!(path = %path.display(), "Loading explicit config");
            figment = figment.merge(Toml::file(path));
        }

        figment
    }

    /// Load only default configuration
    pub fn load_defaults() -> FileConfig {
        FileConfig::default()
    }

    /// `$XDG_CONFIG_HOME/toolgate/config.toml`, or the platform equivalent
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("toolgate").join("config.toml"))
    }

    /// The project-level config file in `dir`, if one exists
    pub fn project_config_path(dir: &Path) -> Option<PathBuf> {
        PROJECT_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_defaults() {
        let config = ConfigLoader::load_defaults();
        assert!(config.backends.is_empty());
        assert_eq!(config.gateway.max_in_flight, 8);
    }

    #[test]
    fn test_global_config_path_returns_some() {
        let path = ConfigLoader::global_config_path().unwrap();
        assert!(path.to_string_lossy().contains("toolgate"));
    }

    #[test]
    fn test_layers_merge_in_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("global.toml");
        fs::write(
            &global,
            "[gateway]\ncall_timeout_secs = 11\nmax_in_flight = 3\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("toolgate.toml"),
            "[gateway]\ncall_timeout_secs = 22\n\n[[backends]]\nname = \"k8s\"\nendpoint = \"127.0.0.1:7401\"\n",
        )
        .unwrap();
        let explicit = dir.path().join("explicit.toml");
        fs::write(&explicit, "[session]\nidle_timeout_secs = 5\n").unwrap();

        let config: FileConfig = ConfigLoader::figment(Some(global), dir.path(), Some(&explicit))
            .extract()
            .unwrap();

        assert_eq!(config.gateway.call_timeout_secs, 22);
        assert_eq!(config.gateway.max_in_flight, 3);
        assert_eq!(config.session.idle_timeout_secs, 5);
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.gateway.health_interval_secs, 15);
    }

    #[test]
    fn test_hidden_project_file_is_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ConfigLoader::project_config_path(dir.path()).is_none());
        fs::write(dir.path().join(".toolgate.toml"), "").unwrap();
        assert!(ConfigLoader::project_config_path(dir.path()).is_some());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[gateway]\nmax_in_flight = \"many\"\n").unwrap();
        let result: Result<FileConfig, _> =
            ConfigLoader::figment(None, dir.path(), Some(&path)).extract();
        assert!(result.is_err());
    }
}
