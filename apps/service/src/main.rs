use std::path::PathBuf;

use clap::Parser;
use koala_service::config::{Config, ConfigError};
use koala_service::orchestrator::Orchestrator;
use thiserror::Error as ThisError;
use tracing::info;

#[derive(Debug, ThisError)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0:#}")]
    Service(#[from] anyhow::Error),
}

/// Koala uptime monitor service
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Config file (defaults to $XDG_CONFIG_HOME/koala/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();
    let config = Config::from_config(args.config.as_ref())?;

    logger::init_with_level(&config.logging.level);
    info!("{}", config);

    Orchestrator::start(config).await?;
    Ok(())
}
