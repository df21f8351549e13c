// Initialization utilities for server mode
//
// Queue storage, unload transport and logging/tracing setup

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use viewtrack_batch::{
    DisabledTransport, HttpBeaconTransport, OpendalQueueStore, QueueStore, TrackerConfig,
    UnloadTransport,
};
use viewtrack_config::{LogFormat, QueueBackend, RuntimeConfig, ServerConfig};

/// Build the local queue store from RuntimeConfig
pub(crate) fn init_queue_store(config: &RuntimeConfig) -> Result<Arc<dyn QueueStore>> {
    let key = config.queue.key.clone();

    let store = match config.queue.backend {
        QueueBackend::Fs => {
            let fs = config
                .queue
                .fs
                .as_ref()
                .context("queue.fs configuration required for fs backend")?;

            std::fs::create_dir_all(&fs.path)
                .with_context(|| format!("Failed to create queue directory: {}", fs.path))?;
            info!(path = %fs.path, key = %key, "Using filesystem queue storage");

            OpendalQueueStore::fs(&fs.path, key)?
        }
        QueueBackend::Memory => {
            warn!("Using in-memory queue storage; pending views are lost on restart");
            OpendalQueueStore::memory(key)?
        }
    };

    Ok(Arc::new(store))
}

pub(crate) fn init_transport(config: &RuntimeConfig) -> Arc<dyn UnloadTransport> {
    match config.beacon.url.as_deref() {
        Some(url) => {
            info!(url, "Unload beacon enabled");
            Arc::new(HttpBeaconTransport::new(url))
        }
        None => {
            info!("Unload beacon disabled; pending views are kept locally on shutdown");
            Arc::new(DisabledTransport)
        }
    }
}

pub(crate) fn tracker_config(config: &RuntimeConfig) -> TrackerConfig {
    TrackerConfig {
        batch_size: config.tracker.batch_size,
        flush_interval: std::time::Duration::from_secs(config.tracker.flush_interval_secs),
        debounce_window: std::time::Duration::from_millis(config.tracker.debounce_window_ms),
    }
}

/// Initialize tracing subscriber from RuntimeConfig
pub(crate) fn init_tracing(config: &RuntimeConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_server = ServerConfig::default();
    let server = config.server.as_ref().unwrap_or(&default_server);

    // Parse log level from config
    let env_filter =
        EnvFilter::try_new(&server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match server.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
    };
    if result.is_err() {
        // Already installed by an embedding process.
        tracing::debug!("Tracing subscriber already initialized");
    }
}
