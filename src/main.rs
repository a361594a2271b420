//! rollgate CLI entry point

use clap::Parser;
use console::style;
use rollgate::cli::{Cli, Commands};
use rollgate::config::{Config, ConfigManager};
use rollgate::error::{RollgateError, RollgateResult};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> RollgateResult<()> {
    let cli = Cli::parse();

    let config_manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    let local_config_path = if cli.no_local {
        None
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| RollgateError::io("getting current directory", e))?;
        ConfigManager::find_local_config(&cwd)
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    init_logging(cli.verbose, &config);
    if let Some(path) = &local_config_path {
        debug!("Using local config: {}", path.display());
    }

    ConfigManager::ensure_state_dirs().await?;

    match cli.command {
        Commands::Run(args) => rollgate::cli::commands::run(args, &config).await,
        Commands::Runs(args) => rollgate::cli::commands::runs(args, &config).await,
        Commands::Show(args) => rollgate::cli::commands::show(args, &config).await,
        Commands::Cache(args) => rollgate::cli::commands::cache(args, &config).await,
        Commands::Config(args) => {
            rollgate::cli::commands::config(args, &config, &config_manager).await
        }
        Commands::Audit(args) => rollgate::cli::commands::audit(args, &config).await,
    }
}

/// 0 = warn (progress output only), 1 = info, 2+ = debug
fn init_logging(verbose: u8, config: &Config) {
    let filter = match verbose {
        0 => EnvFilter::new("rollgate=warn"),
        1 => EnvFilter::new("rollgate=info"),
        _ => EnvFilter::new("rollgate=debug"),
    };

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .with_writer(std::io::stderr)
            .init();
    }
}
