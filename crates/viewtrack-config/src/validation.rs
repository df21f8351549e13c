// Configuration validation
//
// Validates that required fields are present and values are sensible

use crate::*;
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_tracker_settings(&config.tracker)?;
    validate_queue_config(&config.queue)?;
    validate_beacon_config(&config.beacon)?;

    if let Some(ref server) = config.server {
        validate_server_config(server)?;
    }

    Ok(())
}

fn validate_tracker_settings(config: &TrackerSettings) -> Result<()> {
    if config.batch_size == 0 {
        bail!("tracker.batch_size must be greater than 0");
    }

    if config.flush_interval_secs == 0 {
        bail!("tracker.flush_interval_secs must be greater than 0");
    }

    if config.max_transaction_attempts == 0 {
        bail!("tracker.max_transaction_attempts must be greater than 0");
    }

    // A zero debounce window is allowed and disables suppression.
    if config.batch_size > 500 {
        warn!(
            batch_size = config.batch_size,
            "tracker.batch_size is very large; an unload may not fit in one beacon"
        );
    }

    if config.flush_interval_secs > 3600 {
        warn!(
            flush_interval_secs = config.flush_interval_secs,
            "tracker.flush_interval_secs exceeds one hour"
        );
    }

    Ok(())
}

fn validate_queue_config(config: &QueueConfig) -> Result<()> {
    if config.key.trim().is_empty() {
        bail!("queue.key must not be empty");
    }

    if config.backend == QueueBackend::Fs {
        match config.fs {
            Some(ref fs) if !fs.path.trim().is_empty() => {}
            _ => bail!("queue.fs.path is required when queue.backend = \"fs\""),
        }
    }

    Ok(())
}

fn validate_beacon_config(config: &BeaconConfig) -> Result<()> {
    if let Some(ref url) = config.url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("beacon.url must start with http:// or https://, got {}", url);
        }
    }

    Ok(())
}

fn validate_server_config(config: &ServerConfig) -> Result<()> {
    if !config.listen_addr.contains(':') {
        bail!(
            "server.listen_addr must be in format 'host:port', got {}",
            config.listen_addr
        );
    }

    Ok(())
}
