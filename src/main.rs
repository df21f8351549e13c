use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use viewtrack_config::{QueueBackend, RuntimeConfig, ServerConfig};

/// Durable, debounced view tracking with transactional aggregates
#[derive(Parser)]
#[command(name = "viewtrack")]
#[command(version)]
#[command(about = "Durable, debounced view tracking with transactional aggregates", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP listen port (overrides config file)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Directory for the persisted view queue (filesystem backend only)
    #[arg(short, long, value_name = "DIR")]
    queue_dir: Option<PathBuf>,

    /// Endpoint that receives pending views on shutdown
    #[arg(short, long, value_name = "URL")]
    beacon_url: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let mut config = if let Some(config_path) = &cli.config {
        RuntimeConfig::load_from_path(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        RuntimeConfig::load_or_default().context("Failed to load configuration")?
    };

    apply_cli_overrides(&mut config, &cli)?;
    config
        .validate()
        .context("Invalid configuration after applying command line flags")?;

    viewtrack_server::run_with_config(config).await
}

fn apply_cli_overrides(config: &mut RuntimeConfig, cli: &Cli) -> Result<()> {
    if let Some(port) = cli.port {
        let server = config.server.get_or_insert_with(ServerConfig::default);
        server.listen_addr = format!("0.0.0.0:{}", port);
    }

    if let Some(dir) = &cli.queue_dir {
        if config.queue.backend != QueueBackend::Fs {
            anyhow::bail!(
                "--queue-dir only works with the filesystem queue, but backend is '{}'.\n\
                Either remove --queue-dir or set queue.backend to 'fs'.",
                config.queue.backend
            );
        }
        let fs = config.queue.fs.get_or_insert_with(Default::default);
        fs.path = dir.to_string_lossy().to_string();
    }

    if let Some(url) = &cli.beacon_url {
        config.beacon.url = Some(url.clone());
    }

    if let Some(level) = &cli.log_level {
        let server = config.server.get_or_insert_with(ServerConfig::default);
        server.log_level = level.clone();
    }

    Ok(())
}
