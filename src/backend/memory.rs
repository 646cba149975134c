//! In-memory collaborators
//!
//! Used by the test-suite and for running the coordinator without Redis or
//! a database.

use crate::common::{Error, Result};
use crate::ha::dump::{DumpStream, StreamEvent};
use crate::ha::heartbeat::HeartbeatSource;
use crate::ha::store::{InstanceRow, InstanceStore, OwnerHeartbeat};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Ownership table held in a map keyed by environment id
#[derive(Default)]
pub struct MemoryInstanceStore {
    rows: Mutex<HashMap<Vec<u8>, InstanceRow>>,
    failure: Mutex<Option<String>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: impl IntoIterator<Item = InstanceRow>) -> Self {
        let store = Self::new();
        {
            let mut map = store.rows();
            for row in rows {
                map.insert(row.environment_id.to_vec(), row);
            }
        }
        store
    }

    pub fn row(&self, environment_id: &[u8]) -> Option<InstanceRow> {
        self.rows().get(environment_id).cloned()
    }

    /// Rewrite a row's heartbeat, as a peer (or its silence) would
    pub fn set_heartbeat(&self, environment_id: &[u8], heartbeat: i64) {
        if let Some(row) = self.rows().get_mut(environment_id) {
            row.heartbeat = heartbeat;
        }
    }

    /// Hand the row to another instance, as a peer's takeover would
    pub fn force_owner(&self, environment_id: &[u8], id: Uuid, heartbeat: i64) {
        if let Some(row) = self.rows().get_mut(environment_id) {
            row.id = id;
            row.heartbeat = heartbeat;
        }
    }

    /// Make every following statement fail with `reason`
    pub fn fail_with(&self, reason: &str) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.to_string());
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<Vec<u8>, InstanceRow>> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_failure(&self) -> Result<()> {
        match self.failure.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(reason) => Err(Error::Storage(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn fetch_owner(&self, environment_id: &[u8]) -> Result<Option<OwnerHeartbeat>> {
        self.check_failure()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows().get(environment_id).map(|row| OwnerHeartbeat {
            id: row.id,
            heartbeat: row.heartbeat,
        }))
    }

    async fn insert(&self, row: &InstanceRow) -> Result<()> {
        self.check_failure()?;
        let mut rows = self.rows();
        if rows.contains_key(row.environment_id.as_slice()) {
            return Err(Error::Storage(format!(
                "duplicate environment_id {}",
                hex::encode(row.environment_id)
            )));
        }
        rows.insert(row.environment_id.to_vec(), row.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_own(&self, row: &InstanceRow) -> Result<()> {
        self.check_failure()?;
        // Matching no row is not an error, as with an UPDATE touching zero rows.
        for existing in self.rows().values_mut().filter(|r| r.id == row.id) {
            existing.endpoint_id = row.endpoint_id;
            existing.heartbeat = row.heartbeat;
            existing.icinga2_version = row.icinga2_version.clone();
            existing.icinga2_start_time = row.icinga2_start_time;
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn take_over(&self, row: &InstanceRow) -> Result<()> {
        self.check_failure()?;
        if let Some(existing) = self.rows().get_mut(row.environment_id.as_slice()) {
            existing.id = row.id;
            existing.endpoint_id = row.endpoint_id;
            existing.heartbeat = row.heartbeat;
            existing.icinga2_version = row.icinga2_version.clone();
            existing.icinga2_start_time = row.icinga2_start_time;
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Dump progress stream backed by a vector of events
#[derive(Default)]
pub struct MemoryDumpStream {
    events: Mutex<Vec<StreamEvent>>,
    reads: AtomicUsize,
}

impl MemoryDumpStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event; ids must be increasing (`<millis>-<seq>`)
    pub fn push(&self, id: &str, fields: &[(&str, &str)]) {
        let fields = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(StreamEvent {
                id: id.to_string(),
                fields,
            });
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DumpStream for MemoryDumpStream {
    async fn read_after(&self, last_id: &str) -> Result<Vec<StreamEvent>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let after = parse_stream_id(last_id)?;
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let mut newer = Vec::new();
        for event in events.iter() {
            if parse_stream_id(&event.id)? > after {
                newer.push(event.clone());
            }
        }
        Ok(newer)
    }
}

/// Split a stream id into (millis, sequence); a bare number means sequence 0
fn parse_stream_id(id: &str) -> Result<(u64, u64)> {
    let invalid = || Error::Internal(format!("invalid stream id: {}", id));
    let (ms, seq) = id.split_once('-').unwrap_or((id, "0"));
    Ok((
        ms.parse().map_err(|_| invalid())?,
        seq.parse().map_err(|_| invalid())?,
    ))
}

/// Heartbeat payloads fed through a channel
pub struct ChannelHeartbeatSource {
    rx: mpsc::Receiver<String>,
}

impl ChannelHeartbeatSource {
    pub fn channel(capacity: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl HeartbeatSource for ChannelHeartbeatSource {
    async fn next_payload(&mut self) -> Result<String> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| Error::ChannelClosed("heartbeat publisher dropped".into()))
    }
}
