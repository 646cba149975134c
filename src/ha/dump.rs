//! Dump-progress listener
//!
//! While this instance is active, polls the configuration-dump event stream
//! and turns per-type progress into start/stop notifications. Passive
//! instances do not touch the stream at all.

use crate::common::{Error, Result};
use crate::ha::listeners::Notification;
use crate::ha::state::HaState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// One entry of the dump stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// Stream id, `<millis>-<seq>`
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[async_trait]
pub trait DumpStream: Send + Sync {
    /// Events strictly after `last_id`, oldest first. Must not block waiting
    /// for new events; an empty result is a normal poll.
    async fn read_after(&self, last_id: &str) -> Result<Vec<StreamEvent>>;
}

pub struct DumpListener {
    state: Arc<HaState>,
    stream: Arc<dyn DumpStream>,
    interval: Duration,
}

impl DumpListener {
    pub fn new(state: Arc<HaState>, stream: Arc<dyn DumpStream>, interval: Duration) -> Self {
        Self {
            state,
            stream,
            interval,
        }
    }

    /// Poll on every tick until an error occurs
    pub async fn run(self) -> Result<()> {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Starting dump listener");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_once().await?;
        }
    }

    /// One tick: read and dispatch pending events if active.
    ///
    /// Returns the number of events processed.
    pub async fn poll_once(&self) -> Result<usize> {
        if !self.state.is_active() {
            return Ok(0);
        }

        let last_id = self.state.last_event_id();
        let events = self
            .stream
            .read_after(&last_id)
            .await
            .inspect_err(|e| tracing::error!(error = %e, last_id = %last_id, "Failed to read dump stream"))?;

        let mut position = last_id;
        let mut processed = 0;
        for event in &events {
            if !self.dispatch(&position, event).await? {
                tracing::debug!(event_id = %event.id, "Went passive during poll. Dropping batch");
                break;
            }
            position.clone_from(&event.id);
            processed += 1;
        }
        Ok(processed)
    }

    /// Advance past `event` and notify. Returns false without notifying if
    /// the stream position was reset since `position` was read.
    async fn dispatch(&self, position: &str, event: &StreamEvent) -> Result<bool> {
        let object_type = event.field("type").ok_or_else(|| Error::MalformedEvent {
            id: event.id.clone(),
            reason: "missing field 'type'".into(),
        })?;

        if !self.state.advance_last_event_id(position, &event.id) {
            return Ok(false);
        }

        let notification = match event.field("state") {
            Some("done") => Notification::StartSync,
            _ => Notification::StopSync,
        };
        tracing::debug!(
            event_id = %event.id,
            kind = object_type,
            %notification,
            "Dump progress"
        );
        self.state.notify(object_type, notification).await;
        Ok(true)
    }
}
