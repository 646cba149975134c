//! Common utilities and types shared across monsync

pub mod config;
pub mod error;
pub mod metrics;
pub mod packer;
pub mod utils;

pub use config::{Config, DatabaseConfig, HaConfig, RedisConfig};
pub use error::{Error, Result};
pub use metrics::{MetricsRegistry, METRICS};
pub use packer::{pack, ObjectPacker, Packable};
pub use utils::{sha1_bytes, timestamp_now, SHA1_LEN};
