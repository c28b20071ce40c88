//! Trait seams for every external collaborator the specification treats as
//! out of scope (§1): image transport, prompt storage, the moderation
//! scoring algorithm, and strategy-pool data. Concrete providers/arms for
//! the two LLM strategies live in `coach-llm`, which depends on this crate
//! for the shared `ReplyCandidate`/`SceneAnalysisResult` types but defines
//! its own `LlmArm` trait next to the race coordinator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoachError;
use crate::model::ReplyCandidate;

/// Bytes fetched for one image URL, with the fetcher's own validated
/// dimensions (§4.2 step 2: "the fetcher is responsible for size/format
/// validation; the Analyzer only consumes validated bytes").
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, CoachError>;
}

/// A prompt template with its version tag already lifted out (§9 "Prompt
/// version identifier").
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub version_tag: String,
    pub body: String,
}

impl PromptTemplate {
    /// Parses `[PROMPT:name_v1.0-tag]` off the first line, if present.
    pub fn from_raw(raw: &str) -> PromptTemplate {
        let mut lines = raw.splitn(2, '\n');
        let first = lines.next().unwrap_or_default();
        let rest = lines.next().unwrap_or_default();

        if let Some(tag) = first
            .strip_prefix("[PROMPT:")
            .and_then(|s| s.strip_suffix(']'))
        {
            PromptTemplate {
                version_tag: tag.to_string(),
                body: rest.to_string(),
            }
        } else {
            PromptTemplate {
                version_tag: "untagged".to_string(),
                body: raw.to_string(),
            }
        }
    }
}

#[async_trait]
pub trait PromptStore: Send + Sync {
    /// Logical name plus optional explicit version; `None` resolves to the
    /// store's current default for that name.
    async fn get(&self, logical_name: &str, version: Option<&str>) -> Result<PromptTemplate, CoachError>;
}

/// Verdict returned by the moderation / "third-party intimacy" adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationVerdict {
    Pass,
    Warn,
    Rewrite,
    Reject,
}

impl ModerationVerdict {
    pub fn passes(&self) -> bool {
        matches!(self, ModerationVerdict::Pass)
    }
}

#[async_trait]
pub trait ModerationService: Send + Sync {
    /// Scores a candidate reply set against the given intimacy stage
    /// (1..=5, see `intimacy_stage`). Errors represent the moderation
    /// service being unavailable, distinct from a `Reject` verdict.
    async fn check(
        &self,
        candidates: &[ReplyCandidate],
        intimacy_stage: u8,
    ) -> Result<ModerationVerdict, CoachError>;
}

/// Bins `intimacy_level` (0..=100) into a 1..=5 stage (GLOSSARY:
/// "Intimacy stage").
pub fn intimacy_stage(intimacy_level: u8) -> u8 {
    let clamped = intimacy_level.min(100) as u32;
    (clamped * 5 / 101) as u8 + 1
}

/// Per-scenario pool of strategy codes, read-only after startup (§5).
#[async_trait]
pub trait StrategyPool: Send + Sync {
    fn strategies_for(&self, scenario: &crate::model::RecommendedScenario) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_template_extracts_version_tag() {
        let template =
            PromptTemplate::from_raw("[PROMPT:merge_step_v1.0-original]\nBody text here");
        assert_eq!(template.version_tag, "merge_step_v1.0-original");
        assert_eq!(template.body, "Body text here");
    }

    #[test]
    fn prompt_template_without_tag_is_untagged() {
        let template = PromptTemplate::from_raw("Just a body, no tag line");
        assert_eq!(template.version_tag, "untagged");
    }

    #[test]
    fn intimacy_stage_boundaries_are_1_and_5() {
        assert_eq!(intimacy_stage(0), 1);
        assert_eq!(intimacy_stage(100), 5);
    }

    #[test]
    fn moderation_verdict_only_pass_passes() {
        assert!(ModerationVerdict::Pass.passes());
        assert!(!ModerationVerdict::Warn.passes());
        assert!(!ModerationVerdict::Rewrite.passes());
        assert!(!ModerationVerdict::Reject.passes());
    }
}
