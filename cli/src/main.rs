//! CLI entrypoint for toolgate
//!
//! This is the main binary that wires together all layers using
//! dependency injection.

mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{Cli, Command};
use serde_json::Value;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use toolgate_application::{
    CallLogger, Dispatcher, ErrorEnvelope, InvokeRequest, InvokeResponse, SessionStore,
};
use toolgate_domain::InvocationEvent;
use toolgate_infrastructure::{
    BackendPool, ConfigLoader, FileConfig, InMemorySessionStore, JsonSchemaValidator,
    JsonlCallLogger, spawn_sweeper,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = ConfigLoader::load(cli.config.as_deref())?;
    let log_file = cli.log_file.as_deref().or(config.logging.file.as_deref());
    let _guard = init_logging(cli.verbose, config.logging.filter.as_deref(), log_file)?;

    for warning in config.check()? {
        warn!("{}", warning.message);
    }

    info!("Starting toolgate");

    // === Dependency Injection ===
    let pool = BackendPool::new(
        &config.backend_configs(),
        config.gateway.connection_params(),
    );
    pool.start();
    let ready = pool.wait_ready(config.gateway.ready_timeout()).await;
    info!(ready, "Backends ready");

    let sessions = Arc::new(InMemorySessionStore::new(config.session.max_turn_bytes));
    let shutdown = CancellationToken::new();
    let sweeper = spawn_sweeper(
        Arc::clone(&sessions) as Arc<dyn SessionStore>,
        config.session.idle_timeout(),
        config.session.sweep_interval(),
        shutdown.clone(),
    );

    let dispatcher = Arc::new(build_dispatcher(&config, &pool, sessions));

    let outcome = run(cli.command, &dispatcher).await;

    shutdown.cancel();
    let _ = sweeper.await;
    pool.shutdown().await;

    outcome
}

fn build_dispatcher(
    config: &FileConfig,
    pool: &BackendPool,
    sessions: Arc<InMemorySessionStore>,
) -> Dispatcher {
    let mut dispatcher = Dispatcher::new(pool.registry(), pool.connections(), sessions)
        .with_validator(Arc::new(JsonSchemaValidator::new()))
        .with_params(config.gateway.dispatch_params());

    if let Some(path) = &config.logging.call_log
        && let Some(logger) = JsonlCallLogger::open(path)
    {
        info!(path = %logger.path().display(), "Call log enabled");
        dispatcher = dispatcher.with_call_logger(Arc::new(logger) as Arc<dyn CallLogger>);
    }
    dispatcher
}

async fn run(command: Command, dispatcher: &Arc<Dispatcher>) -> Result<ExitCode> {
    match command {
        Command::Capabilities => {
            print_json(&dispatcher.list_capabilities())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            print_json(&dispatcher.backend_status())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Invoke {
            tool,
            args,
            session,
            timeout,
            stream,
        } => {
            let mut request = InvokeRequest::new(tool, parse_args(&args)?);
            if let Some(session) = session {
                request = request.with_session(session);
            }
            if let Some(secs) = timeout {
                request = request.with_timeout(Duration::from_secs(secs));
            }

            let response = if stream {
                invoke_streaming(dispatcher, request).await?
            } else {
                dispatcher.invoke(request).await
            };
            print_json(&response)?;
            Ok(exit_code(response.is_success()))
        }
        Command::Resource { uri, timeout } => {
            let result = dispatcher
                .fetch_resource(&uri, timeout.map(Duration::from_secs))
                .await;
            print_result(result)
        }
        Command::Prompt { name, args } => {
            let result = dispatcher.get_prompt(&name, parse_args(&args)?, None).await;
            print_result(result)
        }
    }
}

/// Print chunks as JSON lines as they arrive, then return the final response.
async fn invoke_streaming(
    dispatcher: &Arc<Dispatcher>,
    request: InvokeRequest,
) -> Result<InvokeResponse> {
    let mut stream = dispatcher.invoke_streaming(request).await;
    while let Some(event) = stream.recv().await {
        match event {
            InvocationEvent::Chunk(chunk) => {
                println!("{}", serde_json::to_string(&serde_json::json!({"chunk": chunk}))?);
            }
            InvocationEvent::Completed(result) => {
                return Ok(InvokeResponse {
                    session_id: stream.session_id,
                    outcome: Ok(result),
                });
            }
            InvocationEvent::Failed(error) => {
                return Ok(InvokeResponse {
                    session_id: stream.session_id,
                    outcome: Err(error),
                });
            }
        }
    }
    bail!("stream ended without a result")
}

fn parse_args(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("--args must be valid JSON")?;
    if !value.is_object() {
        bail!("--args must be a JSON object");
    }
    Ok(value)
}

fn print_result<T: serde::Serialize>(
    result: Result<T, toolgate_domain::GatewayError>,
) -> Result<ExitCode> {
    match result {
        Ok(value) => {
            print_json(&value)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            print_json(&serde_json::json!({"error": ErrorEnvelope::from(&error)}))?;
            Ok(exit_code(false))
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

/// Install the tracing subscriber.
///
/// `-v` flags take precedence over the configured filter. Diagnostics go
/// to stderr, or to `log_file` through a non-blocking writer; stdout is
/// reserved for JSON output.
fn init_logging(
    verbose: u8,
    configured: Option<&str>,
    log_file: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let filter = match verbose {
        0 => match configured {
            Some(directive) => EnvFilter::try_new(directive)
                .with_context(|| format!("invalid logging.filter '{}'", directive))?,
            None => EnvFilter::new("warn"),
        },
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"), // -vvv or more
    };

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("--log-file '{}' has no file name", path.display()))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}
