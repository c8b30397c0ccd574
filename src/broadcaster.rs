//! Event broadcaster
//!
//! Fan-out hub between the scan pipeline and its consumers. Built on
//! `tokio::sync::broadcast`: each subscriber owns a bounded ring
//! buffer, and a slow subscriber loses its oldest events rather than
//! back-pressuring the producer.

use crate::reconciler::ChangeEvent;
use crate::store::{DeviceStore, StatsSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Lifecycle of one scan pass as seen by subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Started,
    Completed,
    Error,
}

/// Counters attached to a completed scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub candidates: usize,
    pub reachable: usize,
    pub auth_failed: usize,
    pub unreachable: usize,
    pub parse_errors: usize,
    pub devices_added: usize,
    pub devices_updated: usize,
    pub devices_removed: usize,
    pub terminals_added: usize,
    pub terminals_updated: usize,
    pub terminals_removed: usize,
    pub events: usize,
    pub duration_ms: u64,
    pub deadline_hit: bool,
}

/// Everything the hub carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HubEvent {
    ScanStatus {
        status: ScanStatus,
        message: String,
        summary: Option<ScanSummary>,
    },
    Stats(StatsSnapshot),
    Change(ChangeEvent),
}

/// Cloneable sender half of the hub
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<HubEvent>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(8));
        Self { tx }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish one event. No subscribers is not an error.
    pub fn publish(&self, event: HubEvent) {
        if self.tx.send(event).is_err() {
            debug!("event published with no subscribers");
        }
    }

    pub fn publish_changes(&self, events: &[ChangeEvent]) {
        for event in events {
            self.publish(HubEvent::Change(event.clone()));
        }
    }

    pub fn publish_status(
        &self,
        status: ScanStatus,
        message: impl Into<String>,
        summary: Option<ScanSummary>,
    ) {
        self.publish(HubEvent::ScanStatus {
            status,
            message: message.into(),
            summary,
        });
    }
}

/// Receiving end; dropping it unsubscribes
pub struct Subscription {
    rx: broadcast::Receiver<HubEvent>,
}

impl Subscription {
    /// Next event, skipping over anything lost to ring-buffer overflow.
    /// `None` once the hub is gone.
    pub async fn next(&mut self) -> Option<HubEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged, oldest events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Periodically publish aggregate stats from the store
pub fn spawn_stats_task(
    store: Arc<dyn DeviceStore>,
    broadcaster: Broadcaster,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match store.stats().await {
                Ok(stats) => broadcaster.publish(HubEvent::Stats(stats)),
                Err(e) => error!(error = %e, "stats read failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn change(ip: &str) -> ChangeEvent {
        ChangeEvent::DeviceRemoved { ip: ip.to_string() }
    }

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let hub = Broadcaster::new(16);
        let mut sub = hub.subscribe();

        hub.publish_status(ScanStatus::Started, "scan started", None);
        hub.publish_changes(&[change("10.0.0.1")]);

        assert!(matches!(
            sub.next().await,
            Some(HubEvent::ScanStatus {
                status: ScanStatus::Started,
                ..
            })
        ));
        assert_eq!(
            sub.next().await,
            Some(HubEvent::Change(change("10.0.0.1")))
        );
    }

    #[tokio::test]
    async fn slow_subscriber_loses_oldest_not_newest() {
        let hub = Broadcaster::new(8);
        let mut sub = hub.subscribe();

        for i in 0..20 {
            hub.publish(HubEvent::Change(change(&format!("10.0.0.{}", i))));
        }

        // Ring buffer holds the last 8; the skip happens inside next()
        let first = sub.next().await.unwrap();
        assert_eq!(first, HubEvent::Change(change("10.0.0.12")));
        let second = sub.next().await.unwrap();
        assert_eq!(second, HubEvent::Change(change("10.0.0.13")));
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let hub = Broadcaster::new(8);
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_task_publishes_on_its_cadence() {
        let store = Arc::new(MemoryStore::new());
        let hub = Broadcaster::new(8);
        let mut sub = hub.subscribe();

        let handle = spawn_stats_task(store, hub.clone(), Duration::from_secs(30));

        let Some(HubEvent::Stats(stats)) = sub.next().await else {
            panic!("expected stats event");
        };
        assert_eq!(stats.total_devices, 0);
        handle.abort();
    }
}
