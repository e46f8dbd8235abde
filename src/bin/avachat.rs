//! CLI binary for the avachat engine.

use avachat::{ChatEngine, EngineConfig, Manifest};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Avachat: real-time avatar conversation engine.
#[derive(Parser)]
#[command(name = "avachat", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start the engine and serve sessions until interrupted.
    Run,

    /// Validate configuration, handler resolution and pipeline typing,
    /// then exit.
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("avachat: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize tracing; RUST_LOG overrides the configured level.
    let default_filter = format!("avachat={}", config.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config).await,
        Command::Check => check(&config),
    }
}

fn load_config(path: Option<&std::path::Path>) -> avachat::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path),
        None => {
            let default = EngineConfig::default_path();
            if default.exists() {
                EngineConfig::from_file(&default)
            } else {
                Ok(EngineConfig::default())
            }
        }
    }
}

async fn run(config: &EngineConfig) -> ExitCode {
    let engine = match ChatEngine::initialize(config, Manifest::builtin()) {
        Ok(engine) => engine,
        Err(e) => {
            error!("startup validation failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        host = %config.service.host,
        port = config.service.port,
        "engine ready; waiting for transport sessions (Ctrl-C to stop)"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
        return ExitCode::FAILURE;
    }

    info!("shutting down, draining sessions");
    engine.manager().shutdown().await;
    ExitCode::SUCCESS
}

fn check(config: &EngineConfig) -> ExitCode {
    match ChatEngine::initialize(config, Manifest::builtin()) {
        Ok(engine) => {
            let stages: Vec<&str> = engine
                .graph()
                .stages()
                .iter()
                .map(|s| s.name.as_str())
                .collect();
            println!(
                "configuration OK: {} handlers, pipeline [{}]",
                engine.registry().len(),
                stages.join(" -> ")
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("avachat: {e}");
            ExitCode::FAILURE
        }
    }
}
