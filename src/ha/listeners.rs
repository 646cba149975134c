//! Sync notification fan-out
//!
//! Downstream sync consumers subscribe per object type (`"host"`,
//! `"service"`, ...) or to every type via [`WILDCARD`]. Delivery waits for
//! queue capacity: a subscriber that stops draining stalls the notifier
//! instead of losing signals.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Listener type matching every notification
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    StartSync,
    StopSync,
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::StartSync => write!(f, "start-sync"),
            Notification::StopSync => write!(f, "stop-sync"),
        }
    }
}

pub struct NotificationRegistry {
    capacity: usize,
    listeners: Mutex<HashMap<String, Vec<mpsc::Sender<Notification>>>>,
}

impl NotificationRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Register a bounded queue for `listener_type` (or [`WILDCARD`])
    pub fn subscribe(&self, listener_type: &str) -> mpsc::Receiver<Notification> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.lock()
            .entry(listener_type.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Deliver `notification` to subscribers of `listener_type` and to
    /// wildcard subscribers. Notifying [`WILDCARD`] reaches everyone.
    ///
    /// Returns the number of queues the notification was delivered to.
    pub async fn notify(&self, listener_type: &str, notification: Notification) -> usize {
        let targets: Vec<mpsc::Sender<Notification>> = {
            let listeners = self.lock();
            listeners
                .iter()
                .filter(|(t, _)| {
                    listener_type == WILDCARD || t.as_str() == listener_type || t.as_str() == WILDCARD
                })
                .flat_map(|(_, senders)| senders.iter().cloned())
                .collect()
        };

        let mut delivered = 0;
        let mut closed = false;
        for tx in targets {
            if tx.send(notification).await.is_ok() {
                delivered += 1;
            } else {
                closed = true;
            }
        }

        if closed {
            self.prune();
        }
        delivered
    }

    /// Number of live queues registered under exactly `listener_type`
    pub fn subscriber_count(&self, listener_type: &str) -> usize {
        self.lock()
            .get(listener_type)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn prune(&self) {
        let mut listeners = self.lock();
        for senders in listeners.values_mut() {
            senders.retain(|tx| !tx.is_closed());
        }
        listeners.retain(|_, senders| !senders.is_empty());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<mpsc::Sender<Notification>>>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_notify_routes_by_type() {
        let registry = NotificationRegistry::new(10);
        let mut host = registry.subscribe("host");
        let mut service = registry.subscribe("service");
        let mut all = registry.subscribe(WILDCARD);

        let delivered = registry.notify("host", Notification::StartSync).await;

        assert_eq!(delivered, 2);
        assert_eq!(host.try_recv().unwrap(), Notification::StartSync);
        assert_eq!(all.try_recv().unwrap(), Notification::StartSync);
        assert!(service.try_recv().is_err());
        assert!(host.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wildcard_notify_reaches_everyone() {
        let registry = NotificationRegistry::new(10);
        let mut host = registry.subscribe("host");
        let mut service = registry.subscribe("service");
        let mut all = registry.subscribe(WILDCARD);

        assert_eq!(registry.notify(WILDCARD, Notification::StopSync).await, 3);
        assert_eq!(host.try_recv().unwrap(), Notification::StopSync);
        assert_eq!(service.try_recv().unwrap(), Notification::StopSync);
        assert_eq!(all.try_recv().unwrap(), Notification::StopSync);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_same_type() {
        let registry = NotificationRegistry::new(10);
        let mut a = registry.subscribe("host");
        let mut b = registry.subscribe("host");

        registry.notify("host", Notification::StopSync).await;
        assert_eq!(a.try_recv().unwrap(), Notification::StopSync);
        assert_eq!(b.try_recv().unwrap(), Notification::StopSync);
        assert_eq!(registry.subscriber_count("host"), 2);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let registry = NotificationRegistry::new(10);
        let dropped = registry.subscribe("host");
        let mut kept = registry.subscribe("host");
        drop(dropped);

        assert_eq!(registry.notify("host", Notification::StartSync).await, 1);
        assert_eq!(kept.try_recv().unwrap(), Notification::StartSync);
        assert_eq!(registry.subscriber_count("host"), 1);
    }

    #[tokio::test]
    async fn test_full_queue_blocks_without_dropping() {
        let registry = Arc::new(NotificationRegistry::new(2));
        let mut rx = registry.subscribe("host");

        registry.notify("host", Notification::StartSync).await;
        registry.notify("host", Notification::StopSync).await;

        // Third signal has nowhere to go until the subscriber drains.
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            registry.notify("host", Notification::StartSync),
        )
        .await;
        assert!(blocked.is_err());

        let notifier = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.notify("host", Notification::StartSync).await })
        };
        tokio::task::yield_now().await;
        assert!(!notifier.is_finished());

        assert_eq!(rx.recv().await, Some(Notification::StartSync));
        assert_eq!(notifier.await.unwrap(), 1);
        assert_eq!(rx.recv().await, Some(Notification::StopSync));
        assert_eq!(rx.recv().await, Some(Notification::StartSync));
        assert!(rx.try_recv().is_err());
    }
}
