//! Session Cache (C4, §4.4): a categorized, resource-scoped, append-only
//! event log keyed by `(session_id, scene, category, resource)`, with
//! last-event-wins reads. Keys are flow-agnostic by design — the category
//! is the logical analysis kind (`context_analysis`, `scene_analysis`,
//! ...), never the flow variant that produced it (§9 "Shared cache keys
//! across flows"): that is what lets a merge-step result satisfy a legacy
//! three-call-flow read and vice versa.
//!
//! Backend is an in-process `DashMap`, following the teacher's
//! `agent-core::tools::registry::ToolRegistry` pattern of wrapping a
//! `DashMap` and documenting that the map handles its own concurrency —
//! no application-level locks are taken here (§5 "Shared resources").

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use coach_core::model::{BBox, Bubble, CacheEvent, ImageResult};
use coach_metrics::{CacheOutcome, EventMeta, MetricsBus, MetricsEvent};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    session_id: String,
    scene: i64,
    category: String,
    resource: String,
}

/// Outcome of a read that may require coordinate repair (§4.4
/// "Coordinate-repair on read").
#[derive(Debug, Clone)]
pub enum CacheLookup<T> {
    Hit(T),
    RepairedHit(T),
    Miss,
}

impl<T> CacheLookup<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            CacheLookup::Hit(v) | CacheLookup::RepairedHit(v) => Some(v),
            CacheLookup::Miss => None,
        }
    }

    pub fn was_hit(&self) -> bool {
        !matches!(self, CacheLookup::Miss)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageDimensions {
    width: u32,
    height: u32,
}

pub struct SessionCache {
    events: DashMap<CacheKey, Vec<CacheEvent>>,
    ttl: Duration,
    metrics: Option<MetricsBus>,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            events: DashMap::new(),
            ttl,
            metrics: None,
        })
    }

    pub fn with_metrics(ttl: Duration, metrics: MetricsBus) -> Arc<Self> {
        Arc::new(Self {
            events: DashMap::new(),
            ttl,
            metrics: Some(metrics),
        })
    }

    fn emit_outcome(&self, session_id: &str, category: &str, resource: &str, outcome: CacheOutcome) {
        if let Some(bus) = &self.metrics {
            bus.emit(MetricsEvent::Cache(coach_metrics::CacheEvent {
                meta: EventMeta::new(None),
                session_id: session_id.to_string(),
                category: category.to_string(),
                resource: resource.to_string(),
                outcome,
            }));
        }
    }

    /// Appends a new event. Writes never overwrite — they are pushed onto
    /// the per-key history, and `get_last` returns the most recent one.
    pub fn append(&self, event: CacheEvent) {
        let key = CacheKey {
            session_id: event.session_id.clone(),
            scene: event.scene,
            category: event.category.0.clone(),
            resource: event.resource.clone(),
        };
        self.events.entry(key).or_default().push(event);
    }

    /// Raw read of the most recent payload for a key, or `None`.
    /// `force_regenerate=true` makes every read miss without touching
    /// writes (§4.4 "Bypass").
    pub fn get_last(
        &self,
        session_id: &str,
        scene: i64,
        category: &str,
        resource: &str,
        force_regenerate: bool,
    ) -> Option<serde_json::Value> {
        if force_regenerate {
            self.emit_outcome(session_id, category, resource, CacheOutcome::Miss);
            return None;
        }

        let key = CacheKey {
            session_id: session_id.to_string(),
            scene,
            category: category.to_string(),
            resource: resource.to_string(),
        };

        let result = self
            .events
            .get(&key)
            .and_then(|events| events.last().map(|event| event.payload.clone()));

        self.emit_outcome(
            session_id,
            category,
            resource,
            if result.is_some() {
                CacheOutcome::Hit
            } else {
                CacheOutcome::Miss
            },
        );
        result
    }

    /// Coordinate-repair-aware read of `image_result` (§4.4). If the
    /// cached bubbles fail the normalized-`[0,1]` invariant, the reader
    /// looks up `image_dimensions` for the same resource and repairs by
    /// dividing through; if dimensions are absent, the entry is treated
    /// as a miss rather than returned raw.
    pub fn get_image_result(
        &self,
        session_id: &str,
        scene: i64,
        resource: &str,
        force_regenerate: bool,
    ) -> CacheLookup<ImageResult> {
        let Some(raw) = self.get_last(
            session_id,
            scene,
            coach_core::model::CacheCategory::IMAGE_RESULT,
            resource,
            force_regenerate,
        ) else {
            return CacheLookup::Miss;
        };

        let Ok(image_result) = serde_json::from_value::<ImageResult>(raw) else {
            return CacheLookup::Miss;
        };

        if image_result.bubbles.iter().all(|b| b.bbox.is_normalized()) {
            self.emit_outcome(
                session_id,
                coach_core::model::CacheCategory::IMAGE_RESULT,
                resource,
                CacheOutcome::Hit,
            );
            return CacheLookup::Hit(image_result);
        }

        let Some(dims_raw) = self.get_last(
            session_id,
            scene,
            coach_core::model::CacheCategory::IMAGE_DIMENSIONS,
            resource,
            force_regenerate,
        ) else {
            self.emit_outcome(
                session_id,
                coach_core::model::CacheCategory::IMAGE_RESULT,
                resource,
                CacheOutcome::Miss,
            );
            return CacheLookup::Miss;
        };

        let Ok(dims) = serde_json::from_value::<ImageDimensions>(dims_raw) else {
            self.emit_outcome(
                session_id,
                coach_core::model::CacheCategory::IMAGE_RESULT,
                resource,
                CacheOutcome::Miss,
            );
            return CacheLookup::Miss;
        };

        let repaired_bubbles: Vec<Bubble> = image_result
            .bubbles
            .into_iter()
            .map(|mut bubble| {
                let normalized: BBox =
                    bubble.bbox.normalize_against(dims.width as f64, dims.height as f64);
                bubble.center = normalized.midpoint();
                bubble.bbox = normalized;
                bubble
            })
            .collect();

        self.emit_outcome(
            session_id,
            coach_core::model::CacheCategory::IMAGE_RESULT,
            resource,
            CacheOutcome::RepairedHit,
        );

        CacheLookup::RepairedHit(ImageResult {
            bubbles: repaired_bubbles,
            ..image_result
        })
    }

    /// Spawns the TTL-sweeping background task (§3 Lifecycle: "Cache
    /// events live for the configured TTL of the session bucket").
    /// Mirrors the teacher's `agent-metrics::worker::MetricsWorker`
    /// spawn-a-loop-with-a-stop-flag shape, but driven by a timer instead
    /// of a channel.
    pub fn spawn_ttl_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                cache.sweep_expired();
            }
        })
    }

    fn sweep_expired(&self) {
        let now = Utc::now();
        let ttl = self.ttl;
        self.events.retain(|_, events| {
            events.retain(|event| {
                now.signed_duration_since(event.ts)
                    .to_std()
                    .map(|age| age < ttl)
                    .unwrap_or(true)
            });
            !events.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_core::model::{CacheCategory, Column, Layout, Participants, Speaker};
    use serde_json::json;

    fn make_event(session: &str, scene: i64, category: &str, resource: &str, payload: serde_json::Value) -> CacheEvent {
        CacheEvent {
            session_id: session.to_string(),
            scene,
            category: CacheCategory::new(category),
            resource: resource.to_string(),
            payload,
            ts: Utc::now(),
            model: None,
            strategy: None,
        }
    }

    #[test]
    fn get_last_returns_most_recently_appended_payload() {
        let cache = SessionCache::new(Duration::from_secs(3600));
        cache.append(make_event("s1", 1, "reply", "r1", json!({"v": 1})));
        cache.append(make_event("s1", 1, "reply", "r1", json!({"v": 2})));

        let value = cache
            .get_last("s1", 1, "reply", "r1", false)
            .expect("should hit");
        assert_eq!(value, json!({"v": 2}));
    }

    #[test]
    fn force_regenerate_misses_but_does_not_clear_history() {
        let cache = SessionCache::new(Duration::from_secs(3600));
        cache.append(make_event("s1", 1, "reply", "r1", json!({"v": 1})));

        assert!(cache.get_last("s1", 1, "reply", "r1", true).is_none());
        assert!(cache.get_last("s1", 1, "reply", "r1", false).is_some());
    }

    #[test]
    fn missing_key_is_a_miss() {
        let cache = SessionCache::new(Duration::from_secs(3600));
        assert!(cache.get_last("s1", 1, "reply", "unknown", false).is_none());
    }

    fn sample_bubble(bbox: BBox) -> Bubble {
        Bubble {
            id: "1".to_string(),
            center: bbox.midpoint(),
            bbox,
            text: "hi".to_string(),
            speaker: Speaker::Other,
            column: Column::Left,
            confidence: 0.95,
        }
    }

    fn sample_image_result(bbox: BBox) -> ImageResult {
        ImageResult {
            url: "https://img/a.png".to_string(),
            width: 0,
            height: 0,
            dialogs: vec![],
            bubbles: vec![sample_bubble(bbox)],
            participants: Participants::default(),
            layout: Layout::default(),
            scenario_json: "{}".to_string(),
        }
    }

    #[test]
    fn image_result_with_normalized_bbox_is_a_plain_hit() {
        let cache = SessionCache::new(Duration::from_secs(3600));
        let bbox = BBox { x1: 0.1, y1: 0.2, x2: 0.3, y2: 0.4 };
        let result = sample_image_result(bbox);
        cache.append(make_event(
            "s1",
            1,
            CacheCategory::IMAGE_RESULT,
            "https://img/a.png",
            serde_json::to_value(&result).unwrap(),
        ));

        match cache.get_image_result("s1", 1, "https://img/a.png", false) {
            CacheLookup::Hit(_) => {}
            other => panic!("expected Hit, got {other:?}"),
        }
    }

    #[test]
    fn image_result_with_pixel_coords_is_repaired_using_dimensions() {
        let cache = SessionCache::new(Duration::from_secs(3600));
        let bbox = BBox { x1: 65.0, y1: 226.0, x2: 636.0, y2: 307.0 };
        let result = sample_image_result(bbox);
        cache.append(make_event(
            "s1",
            1,
            CacheCategory::IMAGE_RESULT,
            "https://img/a.png",
            serde_json::to_value(&result).unwrap(),
        ));
        cache.append(make_event(
            "s1",
            1,
            CacheCategory::IMAGE_DIMENSIONS,
            "https://img/a.png",
            json!({"width": 750, "height": 1334}),
        ));

        match cache.get_image_result("s1", 1, "https://img/a.png", false) {
            CacheLookup::RepairedHit(repaired) => {
                let bbox = repaired.bubbles[0].bbox;
                assert!((bbox.x1 - 65.0 / 750.0).abs() < 1e-9);
                assert!((bbox.y2 - 307.0 / 1334.0).abs() < 1e-9);
                assert!(bbox.is_normalized());
            }
            other => panic!("expected RepairedHit, got {other:?}"),
        }
    }

    #[test]
    fn image_result_with_pixel_coords_and_no_dimensions_is_a_miss() {
        let cache = SessionCache::new(Duration::from_secs(3600));
        let bbox = BBox { x1: 65.0, y1: 226.0, x2: 636.0, y2: 307.0 };
        let result = sample_image_result(bbox);
        cache.append(make_event(
            "s1",
            1,
            CacheCategory::IMAGE_RESULT,
            "https://img/a.png",
            serde_json::to_value(&result).unwrap(),
        ));

        assert!(matches!(
            cache.get_image_result("s1", 1, "https://img/a.png", false),
            CacheLookup::Miss
        ));
    }

    #[test]
    fn ttl_sweep_removes_old_events_but_keeps_fresh_ones() {
        let cache_arc = SessionCache::new(Duration::from_millis(10));
        cache_arc.append(make_event("s1", 1, "reply", "r1", json!({"v": 1})));
        std::thread::sleep(Duration::from_millis(30));
        cache_arc.sweep_expired();

        assert!(cache_arc.get_last("s1", 1, "reply", "r1", false).is_none());
    }
}
