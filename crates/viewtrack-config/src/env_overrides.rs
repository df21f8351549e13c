use super::{FsConfig, LogFormat, QueueBackend, RuntimeConfig, ServerConfig};
use anyhow::{anyhow, Context, Result};

pub const ENV_PREFIX: &str = "VIEWTRACK_";

/// Abstraction over environment-variable lookups so tests and embedders can
/// supply their own source of overrides.
pub trait EnvSource {
    /// Look up `key` with the VIEWTRACK_ prefix applied.
    fn get(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides (highest priority) to the runtime config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // Tracker configuration
    if let Some(val) = get_env_usize(env, "BATCH_SIZE")? {
        config.tracker.batch_size = val;
    }
    if let Some(val) = get_env_u64(env, "FLUSH_INTERVAL_SECS")? {
        config.tracker.flush_interval_secs = val;
    }
    if let Some(val) = get_env_u64(env, "DEBOUNCE_WINDOW_MS")? {
        config.tracker.debounce_window_ms = val;
    }
    if let Some(val) = get_env_u64(env, "MAX_TRANSACTION_ATTEMPTS")? {
        config.tracker.max_transaction_attempts = u32::try_from(val)
            .map_err(|_| anyhow!("{}MAX_TRANSACTION_ATTEMPTS is out of range", ENV_PREFIX))?;
    }

    // Server configuration (listen addr, log level/format)
    if let Some(addr) = get_env_string(env, "LISTEN_ADDR") {
        ensure_server(config).listen_addr = addr;
    }
    if let Some(level) = get_env_string(env, "LOG_LEVEL") {
        ensure_server(config).log_level = level;
    }
    if let Some(format) = get_env_string(env, "LOG_FORMAT") {
        let parsed = match format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };
        ensure_server(config).log_format = parsed;
    }

    // Queue persistence
    if let Some(backend) = get_env_string(env, "QUEUE_BACKEND") {
        config.queue.backend = backend
            .parse::<QueueBackend>()
            .context("Invalid VIEWTRACK_QUEUE_BACKEND value")?;
    }
    if let Some(path) = get_env_string(env, "QUEUE_PATH") {
        config.queue.fs.get_or_insert_with(FsConfig::default).path = path;
    }
    if let Some(key) = get_env_string(env, "QUEUE_KEY") {
        config.queue.key = key;
    }

    // Beacon; an empty value disables it
    if let Some(url) = get_env_string(env, "BEACON_URL") {
        config.beacon.url = if url.is_empty() { None } else { Some(url) };
    }

    Ok(())
}

fn ensure_server(config: &mut RuntimeConfig) -> &mut ServerConfig {
    config.server.get_or_insert_with(ServerConfig::default)
}

fn get_env_string<E: EnvSource>(env: &E, key: &str) -> Option<String> {
    env.get(key)
}

fn get_env_usize<E: EnvSource>(env: &E, key: &str) -> Result<Option<usize>> {
    match get_env_string(env, key) {
        Some(val) => {
            let parsed = val
                .parse::<usize>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn get_env_u64<E: EnvSource>(env: &E, key: &str) -> Result<Option<u64>> {
    match get_env_string(env, key) {
        Some(val) => {
            let parsed = val
                .parse::<u64>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
