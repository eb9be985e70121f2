use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use recoverr::config::{AppConfig, CliConfig, FileConfig};
use recoverr::Daemon;

/// Resolve a CLI path argument to an absolute path. Paths that do not
/// exist yet (a fresh db directory) are kept as given.
fn parse_path(s: &str) -> Result<PathBuf> {
    let raw = PathBuf::from(s);
    let resolved = match raw.canonicalize() {
        Ok(path) => path,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => raw,
        Err(err) => return Err(err).with_context(|| format!("Cannot resolve path {}", s)),
    };
    if resolved.is_absolute() {
        Ok(resolved)
    } else {
        Ok(std::env::current_dir()?.join(resolved))
    }
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory where the SQLite activity database lives.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to a TOML config file. Values in it override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Base URL of the download queue service.
    #[clap(long)]
    pub queue_url: Option<String>,

    /// API key for the download queue service.
    #[clap(long)]
    pub queue_api_key: Option<String>,

    /// Seconds between queue polls.
    #[clap(long, default_value_t = 60)]
    pub poll_interval_seconds: u64,
}

fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("LOG_LEVEL")
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();
    init_logging();

    info!(
        "Starting recoverr {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };

    let cli_config = CliConfig {
        db_dir: cli_args.db_dir,
        queue_url: cli_args.queue_url,
        queue_api_key: cli_args.queue_api_key,
        poll_interval_seconds: cli_args.poll_interval_seconds,
    };

    let config = AppConfig::resolve(&cli_config, file_config)?;
    if config.acquisition_services.is_empty() {
        info!("No acquisition services configured, quality fallback searches will be skipped");
    }

    let daemon = Daemon::start(&config)?;
    info!("Watching download queue at {}", config.queue_service.base_url);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    daemon.shutdown().await;
    Ok(())
}
