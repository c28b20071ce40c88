use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::events::MetricsEvent;

/// A bounded channel-based metrics event bus.
///
/// Uses `try_send` for non-blocking emission. If the channel is full,
/// events are dropped and counted in the `dropped` counter rather than
/// back-pressuring the request path — observability must never slow down
/// the orchestration it's observing.
pub struct MetricsBus {
    tx: mpsc::Sender<MetricsEvent>,
    dropped: Arc<AtomicU64>,
}

impl MetricsBus {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<MetricsEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn emit(&self, event: MetricsEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Clone for MetricsBus {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CacheEvent, CacheOutcome, EventMeta};
    use tokio::time::{timeout, Duration};

    fn sample_cache_event(session: &str) -> MetricsEvent {
        MetricsEvent::Cache(CacheEvent {
            meta: EventMeta::new(None),
            session_id: session.to_string(),
            category: "reply".to_string(),
            resource: "r1".to_string(),
            outcome: CacheOutcome::Hit,
        })
    }

    #[tokio::test]
    async fn emitted_event_is_received() {
        let (bus, mut rx) = MetricsBus::new(10);
        bus.emit(sample_cache_event("s1"));

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("should receive")
            .expect("event should exist");

        match received {
            MetricsEvent::Cache(event) => assert_eq!(event.session_id, "s1"),
            _ => panic!("wrong event type"),
        }
    }

    #[tokio::test]
    async fn full_channel_increments_dropped_counter() {
        let (bus, _rx) = MetricsBus::new(1);
        bus.emit(sample_cache_event("1"));
        bus.emit(sample_cache_event("2"));

        assert_eq!(bus.dropped_count(), 1);
    }

    #[test]
    fn clone_shares_dropped_counter() {
        let (bus1, _rx) = MetricsBus::new(10);
        let bus2 = bus1.clone();
        assert_eq!(bus1.dropped_count(), bus2.dropped_count());
    }
}
