use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use hl_domain::config::{Config, LogFormat, ObservabilityConfig};
use hl_hub::cli::{Cli, Command, ConfigCommand};
use hl_hub::{api, bootstrap, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            let (config, config_path) = hl_hub::cli::load_config()?;
            init_tracing(&config.observability);
            tracing::info!(config = %config_path, "configuration loaded");
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = hl_hub::cli::load_config()?;
            let valid = hl_hub::cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = hl_hub::cli::load_config()?;
            hl_hub::cli::config::show(&config)
        }
        Some(Command::Hosts { json }) => {
            init_cli_tracing();
            let (config, _) = hl_hub::cli::load_config()?;
            hl_hub::cli::hosts::run(&config, json).await
        }
        Some(Command::Version) => {
            println!("hostlink-hub {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured tracing (only for the `serve` command).
fn init_tracing(obs: &ObservabilityConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hl_hub=debug"));

    match obs.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init(),
    }
}

/// Initialize compact stderr-only tracing for CLI one-shot commands.
///
/// Defaults to `warn` level so diagnostic output does not pollute stdout.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "hostlink hub starting");

    // ── Build shared state & spawn background loops ──────────────────
    let shutdown = CancellationToken::new();
    let state = bootstrap::build_app_state(config, shutdown.clone())?;
    bootstrap::spawn_background_tasks(&state);

    tokio::spawn(shutdown_signal(shutdown.clone()));

    let app = api::app(state.clone());
    let served = server::serve(&state, app).await;

    // Fail whatever is still pending and close host sockets.
    shutdown.cancel();
    state.hub.shutdown();
    tracing::info!("shutdown complete");

    served
}

/// Wait for SIGINT or SIGTERM, then cancel `shutdown`.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }

    shutdown.cancel();
}
