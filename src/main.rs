//! # runsync entry point

use anyhow::Context;
use clap::{Parser, Subcommand};
use runsync::{
    config::ConfigLoader,
    db,
    integrations::Registry,
    server::{AppState, run_server},
    telemetry,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "runsync", version, about = "Fitness platform integration service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Apply migrations and serve the HTTP API (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;
    telemetry::init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config).await?;
    db::run_migrations(&db).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => Ok(()),
        Command::Serve => {
            let registry =
                Registry::from_config(&config).context("failed to build provider clients")?;
            let state = AppState::new(db, config, registry);

            let shutdown = CancellationToken::new();
            tokio::spawn(wait_for_signal(shutdown.clone()));

            run_server(state, shutdown).await
        }
    }
}

async fn wait_for_signal(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
        Err(err) => tracing::error!(error = %err, "Failed to listen for shutdown signal"),
    }
}
