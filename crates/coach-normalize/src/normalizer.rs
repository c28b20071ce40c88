//! Top-level entry point tying the parse ladder to domain repair (§9:
//! LLM output modeled as a sum type `Parsed | Wrapped | ParseFailed`
//! rather than exceptions-as-control-flow).

use coach_core::model::{ContextResult, ImageResult, ReplyCandidate, SceneAnalysisResult};
use coach_core::CoachError;
use coach_metrics::{EventMeta, MetricsBus, MetricsEvent, ParseFailureEvent};
use serde_json::Value;
use tracing::warn;

use crate::ladder::run_ladder;
use crate::repair::{
    repair_and_parse_context_result, repair_and_parse_image_result,
    repair_and_parse_reply_candidates, repair_and_parse_scene_result,
};

/// Outcome of normalizing one raw LLM string, per §9's sum-type guidance.
pub enum ParsedResult<T> {
    Parsed(T),
    Wrapped(T),
    ParseFailed(CoachError),
}

impl<T> ParsedResult<T> {
    pub fn into_result(self) -> Result<T, CoachError> {
        match self {
            ParsedResult::Parsed(v) | ParsedResult::Wrapped(v) => Ok(v),
            ParsedResult::ParseFailed(error) => Err(error),
        }
    }

    pub fn is_wrapped(&self) -> bool {
        matches!(self, ParsedResult::Wrapped(_))
    }
}

pub struct Normalizer {
    metrics: Option<MetricsBus>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self { metrics: None }
    }

    pub fn with_metrics(metrics: MetricsBus) -> Self {
        Self { metrics: Some(metrics) }
    }

    fn record_failure(&self, raw_text: &str, last_parser_error: &str) {
        warn!(last_parser_error, "LLM output exhausted the parse ladder");
        if let Some(bus) = &self.metrics {
            bus.emit(MetricsEvent::ParseFailure(ParseFailureEvent {
                meta: EventMeta::new(None),
                raw_text: raw_text.to_string(),
                last_parser_error: last_parser_error.to_string(),
            }));
        }
    }

    fn extract_object(&self, raw: &str) -> Result<Value, CoachError> {
        run_ladder(raw, false, 0)
            .map(|outcome| outcome.value)
            .ok_or_else(|| {
                let error = "all 5 non-wrap strategies failed to produce valid JSON".to_string();
                self.record_failure(raw, &error);
                CoachError::JsonParseExhausted(error)
            })
    }

    /// Normalizes the merge-step output: a single JSON blob carrying the
    /// screenshot parse under `image`, context under `context`, and scene
    /// classification under `scene`.
    pub fn parse_merge_step(
        &self,
        raw: &str,
        width: u32,
        height: u32,
    ) -> ParsedResult<(ImageResult, ContextResult, SceneAnalysisResult)> {
        let value = match self.extract_object(raw) {
            Ok(v) => v,
            Err(error) => return ParsedResult::ParseFailed(error),
        };

        let image_value = value.get("image").cloned().unwrap_or_else(|| Value::Object(Default::default()));
        let context_value = value.get("context").cloned().unwrap_or_else(|| Value::Object(Default::default()));
        let scene_value = value.get("scene").cloned().unwrap_or_else(|| Value::Object(Default::default()));

        let image = match repair_and_parse_image_result(image_value, width, height) {
            Ok(v) => v,
            Err(error) => {
                self.record_failure(raw, &error.to_string());
                return ParsedResult::ParseFailed(error);
            }
        };
        let context = match repair_and_parse_context_result(context_value) {
            Ok(v) => v,
            Err(error) => {
                self.record_failure(raw, &error.to_string());
                return ParsedResult::ParseFailed(error);
            }
        };
        let scene = match repair_and_parse_scene_result(scene_value) {
            Ok(v) => v,
            Err(error) => {
                self.record_failure(raw, &error.to_string());
                return ParsedResult::ParseFailed(error);
            }
        };

        ParsedResult::Parsed((image, context, scene))
    }

    /// Normalizes a reply-generation response. Unlike the merge step, the
    /// plain-text wrap fallback (strategy 6) is enabled here.
    pub fn parse_reply(&self, raw: &str, wrap_threshold: usize) -> ParsedResult<Vec<ReplyCandidate>> {
        let Some(outcome) = run_ladder(raw, true, wrap_threshold) else {
            let error = "parse ladder exhausted, including plain-text wrap".to_string();
            self.record_failure(raw, &error);
            return ParsedResult::ParseFailed(CoachError::JsonParseExhausted(error));
        };

        match repair_and_parse_reply_candidates(&outcome.value) {
            Ok(candidates) if outcome.wrapped => ParsedResult::Wrapped(candidates),
            Ok(candidates) => ParsedResult::Parsed(candidates),
            Err(error) => {
                self.record_failure(raw, &error.to_string());
                ParsedResult::ParseFailed(error)
            }
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_merge_step_recovers_nested_sections() {
        let raw = r#"{
            "image": {"url": "https://img/a.png", "bubbles": []},
            "context": {"conversation_summary": "hi", "emotion_state": "positive", "current_intimacy_level": 40, "risk_flags": []},
            "scene": {"relationship_state": "friendly", "current_scenario": "chit-chat", "recommended_scenario": "SAFE", "intimacy_level": 40, "risk_flags": [], "recommended_strategies": []}
        }"#;
        let normalizer = Normalizer::new();
        match normalizer.parse_merge_step(raw, 750, 1334) {
            ParsedResult::Parsed((image, context, scene)) => {
                assert_eq!(image.url, "https://img/a.png");
                assert_eq!(context.current_intimacy_level, 40);
                assert_eq!(scene.intimacy_level, 40);
            }
            _ => panic!("expected Parsed"),
        }
    }

    #[test]
    fn parse_reply_wraps_short_plain_text() {
        let normalizer = Normalizer::new();
        match normalizer.parse_reply("好的，我明白了。", 500) {
            ParsedResult::Wrapped(candidates) => {
                assert_eq!(candidates.len(), 1);
                assert_eq!(candidates[0].strategy_code, "direct_response");
                assert_eq!(candidates[0].text, "好的，我明白了。");
            }
            _ => panic!("expected Wrapped"),
        }
    }

    #[test]
    fn parse_reply_exhaustion_is_parse_failed() {
        let normalizer = Normalizer::new();
        let long_garbage = "no braces here and ".repeat(50);
        match normalizer.parse_reply(&long_garbage, 10) {
            ParsedResult::ParseFailed(_) => {}
            _ => panic!("expected ParseFailed"),
        }
    }
}
