// viewtrack-config - Unified configuration for the tracker and server
//
// Supports configuration from multiple sources:
// 1. Environment variables (highest priority)
// 2. Config file path from VIEWTRACK_CONFIG env var
// 3. Config file contents from VIEWTRACK_CONFIG_CONTENT env var
// 4. Default config file locations (./config.toml, ./.viewtrack.toml)
// 5. Platform-specific defaults (lowest priority)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

mod env_overrides;
mod platform;
mod sources;
mod validation;

pub use env_overrides::{EnvSource, ENV_PREFIX};
pub use platform::Platform;

/// Main runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub tracker: TrackerSettings,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub beacon: BeaconConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,
}

/// Debounce, batching and retry knobs for the view tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSettings {
    pub batch_size: usize,
    pub flush_interval_secs: u64,
    pub debounce_window_ms: u64,
    #[serde(default = "default_max_transaction_attempts")]
    pub max_transaction_attempts: u32,
}

fn default_max_transaction_attempts() -> u32 {
    5
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval_secs: 60,
            debounce_window_ms: 5_000,
            max_transaction_attempts: default_max_transaction_attempts(),
        }
    }
}

/// Where the pending-event queue is persisted between runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub backend: QueueBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsConfig>,

    /// Storage key of the serialized queue snapshot
    #[serde(default = "default_queue_key")]
    pub key: String,
}

fn default_queue_key() -> String {
    "analyticsQueue.json".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Fs,
            fs: Some(FsConfig::default()),
            key: default_queue_key(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Fs,
    Memory,
}

impl std::fmt::Display for QueueBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueBackend::Fs => write!(f, "fs"),
            QueueBackend::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for QueueBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fs" | "filesystem" => Ok(QueueBackend::Fs),
            "memory" | "mem" => Ok(QueueBackend::Memory),
            _ => anyhow::bail!("Unsupported queue backend: {}. Supported: fs, memory", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    pub path: String,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            path: "./data".to_string(),
        }
    }
}

/// Best-effort delivery used while shutting down
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeaconConfig {
    /// Endpoint receiving the JSON event array. Unset disables the beacon,
    /// so pending events are written back to the queue on shutdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:4380".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl RuntimeConfig {
    /// Load configuration from all sources with priority
    pub fn load() -> Result<Self> {
        let platform = Platform::detect();
        sources::load_config(platform)
    }

    /// Load configuration from a specific file path (for CLI usage).
    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        sources::load_from_file_path(path)
    }

    /// Load configuration with graceful fallback to defaults.
    /// Does not fail if config file is missing - uses platform defaults instead.
    pub fn load_or_default() -> Result<Self> {
        sources::load_or_default(Platform::detect())
    }

    /// Construct a config that contains only platform defaults (no env or files).
    pub fn from_platform_defaults(platform: Platform) -> Self {
        platform_defaults(platform)
    }

    /// Merge another config into this one (used for TOML layering).
    pub fn merge(&mut self, other: RuntimeConfig) {
        self.tracker = other.tracker;
        self.queue = other.queue;

        if other.beacon.url.is_some() {
            self.beacon = other.beacon;
        }
        if other.server.is_some() {
            self.server = other.server;
        }
    }

    /// Apply environment overrides from a custom source.
    pub fn apply_env_overrides_from<E: EnvSource>(&mut self, env: &E) -> Result<()> {
        env_overrides::apply_env_overrides(self, env)
    }

    /// Build a configuration from inline TOML plus overrides supplied by an
    /// `EnvSource`. Used by tests and embedders that do not read files.
    pub fn load_with_env<E: EnvSource>(inline_config: Option<&str>, env: &E) -> Result<Self> {
        let mut config = RuntimeConfig::from_platform_defaults(Platform::detect());

        if let Some(inline) = inline_config {
            let file_config: RuntimeConfig =
                toml::from_str(inline).context("Failed to parse inline config content")?;
            config.merge(file_config);
        }

        config.apply_env_overrides_from(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

fn platform_defaults(platform: Platform) -> RuntimeConfig {
    let defaults = platform.defaults();

    let backend = defaults
        .queue_backend
        .parse::<QueueBackend>()
        .unwrap_or(QueueBackend::Fs);

    let queue = match backend {
        QueueBackend::Fs => QueueConfig {
            backend: QueueBackend::Fs,
            fs: Some(FsConfig::default()),
            key: default_queue_key(),
        },
        QueueBackend::Memory => QueueConfig {
            backend: QueueBackend::Memory,
            fs: None,
            key: default_queue_key(),
        },
    };

    RuntimeConfig {
        tracker: TrackerSettings {
            batch_size: defaults.batch_size,
            flush_interval_secs: defaults.flush_interval_secs,
            debounce_window_ms: defaults.debounce_window_ms,
            max_transaction_attempts: defaults.max_transaction_attempts,
        },
        queue,
        beacon: BeaconConfig::default(),
        server: Some(ServerConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_backend_from_str() {
        assert_eq!("fs".parse::<QueueBackend>().unwrap(), QueueBackend::Fs);
        assert_eq!(
            "filesystem".parse::<QueueBackend>().unwrap(),
            QueueBackend::Fs
        );
        assert_eq!(
            "Memory".parse::<QueueBackend>().unwrap(),
            QueueBackend::Memory
        );
        assert!("s3".parse::<QueueBackend>().is_err());
    }

    #[test]
    fn test_default_configs() {
        let tracker = TrackerSettings::default();
        assert_eq!(tracker.batch_size, 10);
        assert_eq!(tracker.flush_interval_secs, 60);
        assert_eq!(tracker.debounce_window_ms, 5_000);
        assert_eq!(tracker.max_transaction_attempts, 5);

        let queue = QueueConfig::default();
        assert_eq!(queue.key, "analyticsQueue.json");
        assert_eq!(queue.backend, QueueBackend::Fs);

        let server = ServerConfig::default();
        assert_eq!(server.listen_addr, "0.0.0.0:4380");
        assert_eq!(server.log_format, LogFormat::Text);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: RuntimeConfig = toml::from_str(
            r#"
            [tracker]
            batch_size = 25
            flush_interval_secs = 30
            debounce_window_ms = 1000

            [beacon]
            url = "http://localhost:4380/api/analytics"
            "#,
        )
        .unwrap();

        assert_eq!(config.tracker.batch_size, 25);
        assert_eq!(config.tracker.max_transaction_attempts, 5);
        assert_eq!(config.queue.backend, QueueBackend::Fs);
        assert_eq!(
            config.beacon.url.as_deref(),
            Some("http://localhost:4380/api/analytics")
        );
        assert!(config.server.is_none());
    }

    #[test]
    fn test_merge_keeps_server_and_beacon_when_absent() {
        let mut base = RuntimeConfig::from_platform_defaults(Platform::Server);
        base.beacon.url = Some("http://a/api/analytics".into());

        let overlay: RuntimeConfig = toml::from_str("[queue]\nbackend = \"memory\"\n").unwrap();
        base.merge(overlay);

        assert_eq!(base.queue.backend, QueueBackend::Memory);
        assert_eq!(base.beacon.url.as_deref(), Some("http://a/api/analytics"));
        assert!(base.server.is_some());
    }
}
