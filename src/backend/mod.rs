//! Collaborator implementations
//!
//! - `memory`: in-process store, stream and heartbeat source
//! - `sql`: ownership table on MySQL via sqlx
//! - `redis`: heartbeat subscription and dump stream on Redis

pub mod memory;
pub mod redis;
pub mod sql;

pub use memory::{ChannelHeartbeatSource, MemoryDumpStream, MemoryInstanceStore};
pub use self::redis::{RedisDumpStream, RedisHeartbeatSource};
pub use sql::SqlInstanceStore;
