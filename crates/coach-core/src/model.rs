//! Domain types shared by every component of the orchestrator.
//!
//! These mirror the data model in the specification verbatim: `Request`,
//! `Dialog`, `Bubble`, `ImageResult`, `ContextResult`, `SceneAnalysisResult`,
//! `ReplyCandidate` and `CacheEvent`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    #[serde(rename = "self")]
    Myself,
    Other,
}

/// Which side of the screenshot a bubble's column sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Column {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmotionState {
    Positive,
    #[default]
    Neutral,
    Negative,
}

/// Coarse classification of the conversational situation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecommendedScenario {
    Safe,
    #[default]
    Balanced,
    Risky,
    Recovery,
    Negative,
}

/// One utterance, either supplied by the caller or extracted from a screenshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dialog {
    pub speaker: Speaker,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// An axis-aligned bounding box in normalized `[0,1]^2` coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub fn midpoint(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// True when every coordinate lies in `[0,1]` and `x1<=x2`, `y1<=y2`.
    pub fn is_normalized(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
            && self.x1 <= self.x2
            && self.y1 <= self.y2
    }

    /// Divide every coordinate by `(width, height)` and clamp into `[0,1]`.
    pub fn normalize_against(&self, width: f64, height: f64) -> BBox {
        let clamp = |v: f64| v.clamp(0.0, 1.0);
        BBox {
            x1: clamp(self.x1 / width),
            y1: clamp(self.y1 / height),
            x2: clamp(self.x2 / width),
            y2: clamp(self.y2 / height),
        }
    }
}

/// A message bubble extracted from an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bubble {
    pub id: String,
    pub bbox: BBox,
    pub center: (f64, f64),
    pub text: String,
    pub speaker: Speaker,
    pub column: Column,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub nickname: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Participants {
    #[serde(rename = "self")]
    pub myself: Participant,
    pub other: Participant,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Layout {
    #[serde(rename = "type")]
    pub layout_type: String,
    pub left_role: String,
    pub right_role: String,
}

/// Per-image output of the Screenshot Analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResult {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub dialogs: Vec<Dialog>,
    pub bubbles: Vec<Bubble>,
    pub participants: Participants,
    pub layout: Layout,
    pub scenario_json: String,
}

/// Context extracted alongside the screenshot parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextResult {
    pub conversation_summary: String,
    pub emotion_state: EmotionState,
    pub current_intimacy_level: u8,
    pub risk_flags: Vec<String>,
}

/// Scene-level classification, including strategies filled in by the
/// strategy selector rather than by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneAnalysisResult {
    pub relationship_state: String,
    pub current_scenario: String,
    pub recommended_scenario: RecommendedScenario,
    pub intimacy_level: u8,
    pub risk_flags: Vec<String>,
    pub recommended_strategies: Vec<String>,
}

/// One suggested reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyCandidate {
    pub text: String,
    pub strategy_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Cache categories recognized by the Session Cache (§4.4). New categories
/// may be added without a schema change, so this intentionally stays a
/// newtype around a string rather than a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheCategory(pub String);

impl CacheCategory {
    pub const CONTEXT_ANALYSIS: &'static str = "context_analysis";
    pub const SCENE_ANALYSIS: &'static str = "scene_analysis";
    pub const PERSONA_ANALYSIS: &'static str = "persona_analysis";
    pub const REPLY: &'static str = "reply";
    pub const IMAGE_RESULT: &'static str = "image_result";
    pub const IMAGE_DIMENSIONS: &'static str = "image_dimensions";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which merge-step variant produced a cache entry. Observability only —
/// never part of the cache key (see DESIGN.md: shared-cache-keys).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelTag {
    MergeStep,
    NonMergeStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStrategy {
    Parallel,
    Serial,
    Auto,
}

/// One append-only cache record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEvent {
    pub session_id: String,
    pub scene: i64,
    pub category: CacheCategory,
    pub resource: String,
    pub payload: serde_json::Value,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<DispatchStrategy>,
}

/// One item of the request's mixed `content[]` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentItem {
    Image(String),
    Text(String),
}

impl ContentItem {
    /// Classifies a raw string the way the dispatcher does: a URL recognized
    /// as a resource reference is an image, everything else is text.
    pub fn classify(raw: &str) -> ContentItem {
        if looks_like_image_url(raw) {
            ContentItem::Image(raw.to_string())
        } else {
            ContentItem::Text(raw.to_string())
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ContentItem::Image(_))
    }
}

fn looks_like_image_url(raw: &str) -> bool {
    let lower = raw.trim().to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return false;
    }
    const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".webp", ".gif", ".bmp"];
    let path = lower.split(['?', '#']).next().unwrap_or(&lower);
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Incoming request as specified in §6.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub user_id: String,
    pub session_id: String,
    pub scene: i64,
    pub content: Vec<String>,
    pub language: String,
    #[serde(default)]
    pub force_regenerate: bool,
    #[serde(default)]
    pub scene_analysis: bool,
    #[serde(default)]
    pub reply: bool,
    #[serde(default)]
    pub sign: Option<String>,
}

/// One per-content entry of the response's `results[]`.
#[derive(Debug, Clone, Serialize)]
pub struct ContentResult {
    pub content: String,
    pub dialogs: Vec<Dialog>,
    pub scenario: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub message: String,
    pub results: Vec<ContentResult>,
    pub suggested_replies: Option<Vec<ReplyCandidate>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_midpoint_is_the_average_of_corners() {
        let bbox = BBox { x1: 0.1, y1: 0.2, x2: 0.3, y2: 0.6 };
        assert_eq!(bbox.midpoint(), (0.2, 0.4));
    }

    #[test]
    fn bbox_rejects_out_of_range_coordinates() {
        let bbox = BBox { x1: 65.0, y1: 226.0, x2: 636.0, y2: 307.0 };
        assert!(!bbox.is_normalized());
    }

    #[test]
    fn bbox_normalize_against_dimensions_clamps_into_unit_square() {
        let bbox = BBox { x1: 65.0, y1: 226.0, x2: 636.0, y2: 307.0 };
        let normalized = bbox.normalize_against(750.0, 1334.0);
        assert!(normalized.is_normalized());
        assert!((normalized.x1 - 65.0 / 750.0).abs() < 1e-9);
        assert!((normalized.y2 - 307.0 / 1334.0).abs() < 1e-9);
    }

    #[test]
    fn classify_recognizes_image_urls_by_extension() {
        assert!(ContentItem::classify("https://img/a.png").is_image());
        assert!(!ContentItem::classify("hello there").is_image());
        assert!(!ContentItem::classify("https://example.com/page").is_image());
    }
}
