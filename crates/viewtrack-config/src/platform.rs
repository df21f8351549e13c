#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Server,
}

impl Platform {
    /// Auto-detect the current platform.
    pub fn detect() -> Self {
        Platform::Server
    }

    /// Get platform-specific defaults
    pub fn defaults(&self) -> PlatformDefaults {
        match self {
            Platform::Server => PlatformDefaults {
                batch_size: 10,
                flush_interval_secs: 60,
                debounce_window_ms: 5_000,
                max_transaction_attempts: 5,
                queue_backend: "fs",
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlatformDefaults {
    pub batch_size: usize,
    pub flush_interval_secs: u64,
    pub debounce_window_ms: u64,
    pub max_transaction_attempts: u32,
    pub queue_backend: &'static str,
}
