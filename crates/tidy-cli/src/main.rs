//! Tidy CLI - terminal host for the Tidy engine
//!
//! Manages alarms, geofences and the offline change queue, and can run the
//! engine in the foreground to print notifications as they fire.

mod cli;
mod commands;
mod error;
mod host;

use std::sync::Arc;

use clap::Parser;
use tidy_core::geofence::LocationProvider;

use crate::cli::{Cli, Commands};
use crate::commands::alarm::run_alarm;
use crate::commands::common::{load_config, resolve_config_path, resolve_db_path};
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::geofence::run_geofence;
use crate::commands::run::run_foreground;
use crate::commands::sync::run_sync;
use crate::error::CliError;
use crate::host::{open_host, ReplayLocationProvider};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "tidy=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let config_path = resolve_config_path(cli.config);

    match cli.command {
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref())?,
        Commands::Config { command } => run_config(command, &config_path)?,
        Commands::Run { positions, offline } => {
            let config = load_config(&config_path)?;
            let provider = match positions {
                Some(path) => Some(
                    Arc::new(ReplayLocationProvider::from_path(&path)?) as Arc<dyn LocationProvider>
                ),
                None => None,
            };
            let host = open_host(config, &db_path, provider, offline).await?;
            run_foreground(host).await?;
        }
        Commands::Alarm { command } => {
            let host = open_host(load_config(&config_path)?, &db_path, None, false).await?;
            let result = run_alarm(command, &host.engine).await;
            host.engine.dispose().await;
            result?;
        }
        Commands::Geofence { command } => {
            let host = open_host(load_config(&config_path)?, &db_path, None, false).await?;
            let result = run_geofence(command, &host.engine).await;
            host.engine.dispose().await;
            result?;
        }
        Commands::Sync { command } => {
            let host = open_host(load_config(&config_path)?, &db_path, None, false).await?;
            let result = run_sync(command, &host.engine).await;
            host.engine.dispose().await;
            result?;
        }
    }

    Ok(())
}
