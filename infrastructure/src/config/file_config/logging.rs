//! Logging configuration from TOML (`[logging]` section)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw logging configuration from TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    /// `tracing` filter directive; `-v` flags override it
    pub filter: Option<String>,
    /// Diagnostic log file (non-blocking writer)
    pub file: Option<PathBuf>,
    /// JSONL call log; disabled when unset
    pub call_log: Option<PathBuf>,
}
