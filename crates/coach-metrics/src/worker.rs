use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::mpsc;

use crate::aggregator::MetricsAggregator;
use crate::events::MetricsEvent;
use crate::storage::MetricsStorage;

/// Consumes metrics events from the bus, persists them, and folds them
/// into the in-memory aggregator. Modeled on the teacher's
/// `agent-metrics::worker::MetricsWorker` consumption loop.
pub struct MetricsWorker {
    storage: Arc<dyn MetricsStorage>,
    aggregator: Arc<MetricsAggregator>,
    running: Arc<AtomicBool>,
}

impl MetricsWorker {
    pub fn new(storage: Arc<dyn MetricsStorage>, aggregator: Arc<MetricsAggregator>) -> Self {
        Self {
            storage,
            aggregator,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn spawn(&self, mut receiver: mpsc::Receiver<MetricsEvent>) -> Arc<AtomicBool> {
        let storage = Arc::clone(&self.storage);
        let aggregator = Arc::clone(&self.aggregator);
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            info!("metrics worker started");
            while running.load(Ordering::SeqCst) {
                match receiver.recv().await {
                    Some(event) => {
                        aggregator.record(&event);
                        if let Err(error) = Self::persist(&storage, &event).await {
                            warn!("failed to persist metrics event: {error}");
                        }
                    }
                    None => {
                        info!("metrics channel closed");
                        break;
                    }
                }
            }
            info!("metrics worker stopped");
        });

        Arc::clone(&self.running)
    }

    async fn persist(storage: &Arc<dyn MetricsStorage>, event: &MetricsEvent) -> anyhow::Result<()> {
        match event {
            MetricsEvent::LlmCall(event) => storage.record_llm_call(event).await,
            MetricsEvent::Race(event) => storage.record_race(event).await,
            MetricsEvent::Cache(event) => storage.record_cache(event).await,
            MetricsEvent::Retry(event) => storage.record_retry(event).await,
            MetricsEvent::Moderation(event) => storage.record_moderation(event).await,
            MetricsEvent::Dispatch(event) => storage.record_dispatch(event).await,
            MetricsEvent::ParseFailure(event) => storage.record_parse_failure(event).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MetricsBus;
    use crate::events::{CacheEvent, CacheOutcome, EventMeta};
    use crate::storage::NullMetricsStorage;
    use std::time::Duration;

    #[tokio::test]
    async fn worker_folds_events_into_the_aggregator() {
        let (bus, rx) = MetricsBus::new(10);
        let aggregator = Arc::new(MetricsAggregator::default());
        let worker = MetricsWorker::new(Arc::new(NullMetricsStorage), Arc::clone(&aggregator));
        worker.spawn(rx);

        bus.emit(MetricsEvent::Cache(CacheEvent {
            meta: EventMeta::new(None),
            session_id: "s1".to_string(),
            category: "reply".to_string(),
            resource: "r1".to_string(),
            outcome: CacheOutcome::Hit,
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(aggregator.snapshot().cache_hits, 1);
    }
}
