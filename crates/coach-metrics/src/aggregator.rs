use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::events::{CacheOutcome, MetricsEvent, RaceOutcomeKind};

/// In-memory running counters exposed by the `/metrics/summary` route.
/// Mirrors the teacher's `agent-metrics::aggregator` shape: cheap atomics,
/// no lock contention with the hot path.
#[derive(Default)]
pub struct MetricsAggregator {
    llm_calls: AtomicU64,
    llm_call_failures: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    race_winners: AtomicU64,
    race_losers: AtomicU64,
    race_both_invalid: AtomicU64,
    retries: AtomicU64,
    moderation_rejections: AtomicU64,
    dispatches: AtomicU64,
    parse_failures: AtomicU64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct MetricsSnapshot {
    pub llm_calls: u64,
    pub llm_call_failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub race_winners: u64,
    pub race_losers: u64,
    pub race_both_invalid: u64,
    pub retries: u64,
    pub moderation_rejections: u64,
    pub dispatches: u64,
    pub parse_failures: u64,
}

impl MetricsAggregator {
    pub fn record(&self, event: &MetricsEvent) {
        match event {
            MetricsEvent::LlmCall(event) => {
                self.llm_calls.fetch_add(1, Ordering::Relaxed);
                if !matches!(event.status, crate::events::LlmCallStatus::Success) {
                    self.llm_call_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
            MetricsEvent::Cache(event) => match event.outcome {
                CacheOutcome::Hit | CacheOutcome::RepairedHit => {
                    self.cache_hits.fetch_add(1, Ordering::Relaxed);
                }
                CacheOutcome::Miss => {
                    self.cache_misses.fetch_add(1, Ordering::Relaxed);
                }
            },
            MetricsEvent::Race(event) => match event.outcome {
                RaceOutcomeKind::Winner => {
                    self.race_winners.fetch_add(1, Ordering::Relaxed);
                }
                RaceOutcomeKind::Loser => {
                    self.race_losers.fetch_add(1, Ordering::Relaxed);
                }
                RaceOutcomeKind::BothInvalid => {
                    self.race_both_invalid.fetch_add(1, Ordering::Relaxed);
                }
            },
            MetricsEvent::Retry(_) => {
                self.retries.fetch_add(1, Ordering::Relaxed);
            }
            MetricsEvent::Moderation(event) => {
                if event.verdict != "pass" {
                    self.moderation_rejections.fetch_add(1, Ordering::Relaxed);
                }
            }
            MetricsEvent::Dispatch(_) => {
                self.dispatches.fetch_add(1, Ordering::Relaxed);
            }
            MetricsEvent::ParseFailure(_) => {
                self.parse_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            llm_calls: self.llm_calls.load(Ordering::Relaxed),
            llm_call_failures: self.llm_call_failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            race_winners: self.race_winners.load(Ordering::Relaxed),
            race_losers: self.race_losers.load(Ordering::Relaxed),
            race_both_invalid: self.race_both_invalid.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            moderation_rejections: self.moderation_rejections.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CacheEvent, CacheOutcome, EventMeta};

    #[test]
    fn records_cache_hit_into_snapshot() {
        let aggregator = MetricsAggregator::default();
        aggregator.record(&MetricsEvent::Cache(CacheEvent {
            meta: EventMeta::new(None),
            session_id: "s1".to_string(),
            category: "reply".to_string(),
            resource: "r1".to_string(),
            outcome: CacheOutcome::Hit,
        }));

        assert_eq!(aggregator.snapshot().cache_hits, 1);
        assert_eq!(aggregator.snapshot().cache_misses, 0);
    }
}
