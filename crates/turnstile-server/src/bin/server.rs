//! Turnstile server binary

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use turnstile_common_config::{vars, ConfigLoader, Environment, LoggingConfig};
use turnstile_common_log::{info, LogConfig, LogFormat, LogLevel};
use turnstile_common_metrics::MetricsRegistry;
use turnstile_server::{shutdown_signal, Server, ShutdownOutcome};

/// Connection-gated TCP server.
#[derive(Debug, Parser)]
#[command(name = "turnstile-server", version, about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = vars::CONFIG_PATH)]
    config: PathBuf,

    /// Log level, overriding the configuration file.
    #[arg(long)]
    log_level: Option<String>,
}

fn log_config(logging: &LoggingConfig, level_override: Option<&str>) -> LogConfig {
    let mut config = LogConfig {
        level: LogLevel::parse(&logging.level).unwrap_or_default(),
        format: LogFormat::parse(&logging.format),
        file_path: logging.file.as_ref().map(PathBuf::from),
        ..LogConfig::default()
    };
    config.apply_env();

    if let Some(level) = level_override.and_then(LogLevel::parse) {
        config.level = level;
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    let _env = Environment::init();
    let cli = Cli::parse();

    let config = ConfigLoader::from_path(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    turnstile_common_log::init(log_config(&config.logging, cli.log_level.as_deref()))
        .context("failed to initialise logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "starting turnstile server"
    );

    let registry = Arc::new(MetricsRegistry::new());
    let server = Server::bind(config, registry).await?;

    shutdown_signal().await;

    if let ShutdownOutcome::TimedOut { remaining } = server.shutdown().await {
        info!(remaining, "exiting with connections still open");
    }
    Ok(())
}
