//! Ownership table access
//!
//! One row per environment names the instance currently responsible for it
//! and when that instance last confirmed a heartbeat. Rows are arbitrated
//! purely by heartbeat timestamps; there are no locks or transactions.

use crate::common::{Result, SHA1_LEN};
use async_trait::async_trait;
use uuid::Uuid;

/// Full ownership row as written by the coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRow {
    pub id: Uuid,
    pub environment_id: [u8; SHA1_LEN],
    pub endpoint_id: Option<[u8; SHA1_LEN]>,
    /// Seconds since epoch
    pub heartbeat: i64,
    pub responsible: bool,
    pub icinga2_version: String,
    /// Milliseconds since epoch
    pub icinga2_start_time: i64,
}

/// Owner and last heartbeat of an environment's row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerHeartbeat {
    pub id: Uuid,
    pub heartbeat: i64,
}

impl OwnerHeartbeat {
    /// Has the owner been silent for longer than `timeout_secs`?
    pub fn is_stale(&self, now: i64, timeout_secs: u64) -> bool {
        now - self.heartbeat > timeout_secs as i64
    }
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// `SELECT id, heartbeat ... WHERE environment_id = ? LIMIT 1`
    async fn fetch_owner(&self, environment_id: &[u8]) -> Result<Option<OwnerHeartbeat>>;

    /// Insert a new row marked responsible
    async fn insert(&self, row: &InstanceRow) -> Result<()>;

    /// Refresh the row owned by `row.id`
    async fn update_own(&self, row: &InstanceRow) -> Result<()>;

    /// Overwrite owner and heartbeat of the row for `row.environment_id`
    async fn take_over(&self, row: &InstanceRow) -> Result<()>;
}
