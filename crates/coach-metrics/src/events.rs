//! Event taxonomy for the observability paragraph of §7: every LLM call,
//! cache hit/miss, race winner/loser, retry attempt and moderation
//! decision is recorded as one of these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMeta {
    pub event_id: String,
    pub occurred_at: DateTime<Utc>,
    pub trace_id: Option<String>,
}

impl EventMeta {
    pub fn new(trace_id: impl Into<Option<String>>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            occurred_at: Utc::now(),
            trace_id: trace_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmCallStatus {
    Success,
    Error,
    Timeout,
}

/// One LLM round trip, as described by §7's Observability paragraph:
/// start/end timestamps, provider, model, token counts, cost estimate,
/// prompt version identifier, and status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCallEvent {
    pub meta: EventMeta,
    pub provider: String,
    pub model: String,
    pub prompt_version: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_estimate_usd: f64,
    pub latency_ms: u64,
    pub status: LlmCallStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceOutcomeKind {
    Winner,
    Loser,
    BothInvalid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceEvent {
    pub meta: EventMeta,
    pub arm_label: String,
    pub outcome: RaceOutcomeKind,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    Hit,
    Miss,
    RepairedHit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEvent {
    pub meta: EventMeta,
    pub session_id: String,
    pub category: String,
    pub resource: String,
    pub outcome: CacheOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryEvent {
    pub meta: EventMeta,
    pub session_id: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationEvent {
    pub meta: EventMeta,
    pub session_id: String,
    pub verdict: String,
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub meta: EventMeta,
    pub session_id: String,
    pub item_count: usize,
    pub parallel: bool,
    pub latency_ms: u64,
    pub success: bool,
}

/// A parse-ladder failure artefact (§4.6 "Failure artefacts"), logged for
/// post-hoc diagnosis only — never part of the API contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseFailureEvent {
    pub meta: EventMeta,
    pub raw_text: String,
    pub last_parser_error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MetricsEvent {
    LlmCall(LlmCallEvent),
    Race(RaceEvent),
    Cache(CacheEvent),
    Retry(RetryEvent),
    Moderation(ModerationEvent),
    Dispatch(DispatchEvent),
    ParseFailure(ParseFailureEvent),
}
