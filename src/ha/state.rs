//! State shared between the coordinator and the dump-progress listener

use crate::common::METRICS;
use crate::ha::listeners::{Notification, NotificationRegistry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Resumption token meaning "from the beginning of the stream"
pub const STREAM_START: &str = "0-0";

pub struct HaState {
    active: AtomicBool,
    last_event_id: Mutex<String>,
    listeners: NotificationRegistry,
}

impl HaState {
    pub fn new(listener_capacity: usize) -> Self {
        Self {
            active: AtomicBool::new(false),
            last_event_id: Mutex::new(STREAM_START.to_string()),
            listeners: NotificationRegistry::new(listener_capacity),
        }
    }

    /// Whether this instance may currently write synchronized state.
    ///
    /// Readers outside the coordinator may observe a value one tick old.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
        METRICS.active.set(active as u64);
    }

    pub fn last_event_id(&self) -> String {
        self.event_id().clone()
    }

    pub(crate) fn set_last_event_id(&self, id: &str) {
        *self.event_id() = id.to_string();
    }

    /// Forget the stream position so the dump is replayed after reactivation
    pub(crate) fn reset_last_event_id(&self) {
        self.set_last_event_id(STREAM_START);
    }

    /// Move the stream position from `from` to `to`, unless this instance
    /// went passive or the position changed in the meantime.
    pub(crate) fn advance_last_event_id(&self, from: &str, to: &str) -> bool {
        let mut current = self.event_id();
        if !self.is_active() || *current != from {
            return false;
        }
        *current = to.to_string();
        true
    }

    pub fn subscribe(&self, listener_type: &str) -> mpsc::Receiver<Notification> {
        self.listeners.subscribe(listener_type)
    }

    pub(crate) async fn notify(&self, listener_type: &str, notification: Notification) {
        let delivered = self.listeners.notify(listener_type, notification).await;
        METRICS.notifications.add(delivered as u64);
    }

    fn event_id(&self) -> std::sync::MutexGuard<'_, String> {
        self.last_event_id.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = HaState::new(10);
        assert!(!state.is_active());
        assert_eq!(state.last_event_id(), STREAM_START);
    }

    #[test]
    fn test_reset_event_id() {
        let state = HaState::new(10);
        state.set_last_event_id("1700000000000-3");
        assert_eq!(state.last_event_id(), "1700000000000-3");
        state.reset_last_event_id();
        assert_eq!(state.last_event_id(), "0-0");
    }

    #[test]
    fn test_advance_requires_active_and_unchanged_position() {
        let state = HaState::new(10);
        assert!(!state.advance_last_event_id(STREAM_START, "1-0"));
        assert_eq!(state.last_event_id(), STREAM_START);

        state.set_active(true);
        assert!(state.advance_last_event_id(STREAM_START, "1-0"));
        assert!(!state.advance_last_event_id(STREAM_START, "2-0"));
        assert!(state.advance_last_event_id("1-0", "2-0"));
        assert_eq!(state.last_event_id(), "2-0");
    }
}
