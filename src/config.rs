//! Configuration management for videoroom-core

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Signalling configuration
    #[serde(default)]
    pub signaller: SignallerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignallerConfig {
    /// Keepalive period in seconds
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    /// Length of generated transaction ids
    #[serde(default = "default_transaction_id_length")]
    pub transaction_id_length: usize,
}

impl Default for SignallerConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_secs: default_keepalive_interval_secs(),
            transaction_id_length: default_transaction_id_length(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// Initialize env_logger at the configured level. `RUST_LOG` takes
    /// precedence; repeat calls are no-ops.
    pub fn init(&self) {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(self.level.clone()),
        )
        .try_init();
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.signaller.keepalive_interval_secs == 0 {
            return Err("Keepalive interval must be non-zero".into());
        }

        // Shorter ids make pending-transaction collisions plausible
        if self.signaller.transaction_id_length < 8 {
            return Err("Transaction id length must be at least 8".into());
        }

        Ok(())
    }
}


fn default_keepalive_interval_secs() -> u64 {
    25
}

fn default_transaction_id_length() -> usize {
    12
}

fn default_log_level() -> String {
    "info".to_string()
}
