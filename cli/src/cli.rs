//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for toolgate
#[derive(Parser, Debug)]
#[command(name = "toolgate")]
#[command(author, version, about = "Route agent tool calls to many backend systems")]
#[command(long_about = r#"
toolgate connects to every configured backend, discovers the tools,
resources and prompts each one exposes, and routes calls to the backend
that owns them. Output is JSON on stdout.

Configuration files are loaded from (in priority order):
1. TOOLGATE_* environment variables (e.g. TOOLGATE_GATEWAY__MAX_IN_FLIGHT=4)
2. --config <path>      Explicit config file
3. ./toolgate.toml      Project-level config
4. ~/.config/toolgate/config.toml   Global config

Example:
  toolgate capabilities
  toolgate invoke list_pods --args '{"namespace": "prod"}'
  toolgate invoke ci.trigger_build --args '{"job": "nightly"}' --stream
  toolgate resource k8s://pods/api-0
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Write diagnostic logs to this file instead of stderr
    #[arg(long, value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List every tool, resource and prompt across ready backends
    Capabilities,

    /// Invoke a tool by bare or qualified (`backend.tool`) name
    Invoke {
        tool: String,

        /// Arguments as a JSON object
        #[arg(long, value_name = "JSON", default_value = "{}")]
        args: String,

        /// Session to record the call in
        #[arg(long, value_name = "ID")]
        session: Option<String>,

        /// Call deadline in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Print incremental output as JSON lines before the result
        #[arg(long)]
        stream: bool,
    },

    /// Fetch a resource by URI
    Resource {
        uri: String,

        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Render a prompt template
    Prompt {
        name: String,

        /// Arguments as a JSON object
        #[arg(long, value_name = "JSON", default_value = "{}")]
        args: String,
    },

    /// Show connection state of every backend
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_invoke() {
        let cli = Cli::parse_from([
            "toolgate",
            "-vv",
            "invoke",
            "k8s.list_pods",
            "--args",
            r#"{"namespace":"prod"}"#,
            "--session",
            "s1",
            "--timeout",
            "5",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Invoke {
                tool,
                session,
                timeout,
                stream,
                ..
            } => {
                assert_eq!(tool, "k8s.list_pods");
                assert_eq!(session.as_deref(), Some("s1"));
                assert_eq!(timeout, Some(5));
                assert!(!stream);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["toolgate", "status", "--config", "gw.toml"]);
        assert!(matches!(cli.command, Command::Status));
        assert_eq!(cli.config, Some(PathBuf::from("gw.toml")));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
