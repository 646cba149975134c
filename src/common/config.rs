//! Configuration for monsync
//!
//! Values come from an optional TOML file, then `MONSYNC__*` environment
//! variables (e.g. `MONSYNC__REDIS__URL`), then CLI flags in the binary.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Redis connection (heartbeat channel, dump stream)
    pub redis: RedisConfig,

    /// SQL connection (ownership table)
    pub database: DatabaseConfig,

    /// Election timings and queue sizes
    pub ha: HaConfig,

    /// Logging level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            database: DatabaseConfig::default(),
            ha: HaConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load config from an optional file, overlaid with environment variables
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("MONSYNC")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.ha.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,

    /// Pub/Sub channel carrying the monitored source's status
    pub heartbeat_channel: String,

    /// Stream carrying config dump progress markers
    pub dump_stream: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            heartbeat_channel: "icinga:stats".to_string(),
            dump_stream: "icinga:dump".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "mysql://icingadb@localhost/icingadb".to_string(),
            max_connections: 16,
        }
    }
}

/// HA coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HaConfig {
    /// Silence after which a heartbeat owner counts as dead
    pub takeover_timeout_secs: u64,

    /// Heartbeat gap below which an active instance skips the ownership read
    pub fast_path_secs: u64,

    /// Dump stream poll cadence
    pub dump_poll_interval_ms: u64,

    /// Capacity of each notification queue
    pub listener_capacity: usize,

    /// Capacity of the heartbeat -> coordinator queue
    pub environment_queue: usize,
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            takeover_timeout_secs: 15,
            fast_path_secs: 10,
            dump_poll_interval_ms: 1000,
            listener_capacity: 10,
            environment_queue: 16,
        }
    }
}

impl HaConfig {
    pub fn takeover_timeout(&self) -> Duration {
        Duration::from_secs(self.takeover_timeout_secs)
    }

    pub fn dump_poll_interval(&self) -> Duration {
        Duration::from_millis(self.dump_poll_interval_ms)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.takeover_timeout_secs == 0 {
            return Err(crate::Error::InvalidConfig(
                "ha.takeover_timeout_secs must be positive".into(),
            ));
        }
        if self.fast_path_secs > self.takeover_timeout_secs {
            return Err(crate::Error::InvalidConfig(format!(
                "ha.fast_path_secs ({}) exceeds ha.takeover_timeout_secs ({})",
                self.fast_path_secs, self.takeover_timeout_secs
            )));
        }
        if self.dump_poll_interval_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "ha.dump_poll_interval_ms must be positive".into(),
            ));
        }
        if self.listener_capacity == 0 || self.environment_queue == 0 {
            return Err(crate::Error::InvalidConfig(
                "queue capacities must be positive".into(),
            ));
        }
        Ok(())
    }
}
