//! Shared test doubles for the orchestration tests in `dispatcher`,
//! `analyzer` and `reply`. Only compiled under `#[cfg(test)]`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use coach_core::model::RecommendedScenario;
use coach_core::{
    CoachError, FetchedImage, ImageFetcher, ModerationService, ModerationVerdict, OrchestratorConfig,
    PromptStore, PromptTemplate, ReplyCandidate, StrategyPool,
};
use coach_metrics::MetricsBus;
use tokio_util::sync::CancellationToken;

use crate::llm_provider::{test_support::ScriptedProvider, Providers};
use crate::scope::RequestScope;

pub struct FakeImageFetcher;

#[async_trait]
impl ImageFetcher for FakeImageFetcher {
    async fn fetch(&self, _url: &str) -> Result<FetchedImage, CoachError> {
        Ok(FetchedImage { bytes: vec![0u8; 4], width: 750, height: 1334 })
    }
}

pub struct FakePromptStore;

#[async_trait]
impl PromptStore for FakePromptStore {
    async fn get(&self, logical_name: &str, _version: Option<&str>) -> Result<PromptTemplate, CoachError> {
        Ok(PromptTemplate {
            version_tag: format!("{logical_name}_v1.0-test"),
            body: format!("test prompt for {logical_name}"),
        })
    }
}

/// Always passes, regardless of stage.
pub struct AlwaysPassModeration;

#[async_trait]
impl ModerationService for AlwaysPassModeration {
    async fn check(&self, _candidates: &[ReplyCandidate], _stage: u8) -> Result<ModerationVerdict, CoachError> {
        Ok(ModerationVerdict::Pass)
    }
}

/// Returns a scripted sequence of verdicts, one per call, holding the last
/// once exhausted.
pub struct ScriptedModeration {
    verdicts: Vec<ModerationVerdict>,
    calls: AtomicUsize,
}

impl ScriptedModeration {
    pub fn new(verdicts: Vec<ModerationVerdict>) -> Self {
        Self { verdicts, calls: AtomicUsize::new(0) }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModerationService for ScriptedModeration {
    async fn check(&self, _candidates: &[ReplyCandidate], _stage: u8) -> Result<ModerationVerdict, CoachError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.verdicts.get(index.min(self.verdicts.len() - 1)).unwrap_or(&ModerationVerdict::Pass))
    }
}

pub struct FixedStrategyPool;

impl StrategyPool for FixedStrategyPool {
    fn strategies_for(&self, _scenario: &RecommendedScenario) -> Vec<String> {
        vec!["light_humor".to_string(), "empathetic_ack".to_string(), "curious_question".to_string()]
    }
}

/// Builds a `RequestScope` wired to the given race-arm responses
/// (multimodal/premium) and reply-arm responses, with no metrics bus and a
/// generous set of default collaborators. Callers override individual
/// fields by destructuring.
pub fn scope_with_providers(
    multimodal_responses: Vec<Result<String, CoachError>>,
    premium_responses: Vec<Result<String, CoachError>>,
    reply_responses: Vec<Result<String, CoachError>>,
) -> RequestScope {
    scope_with_providers_and_handles(multimodal_responses, premium_responses, reply_responses).0
}

/// Like `scope_with_providers`, but also hands back the concrete
/// `ScriptedProvider`s so a test can assert on `call_count()` — something
/// the `LlmProvider` trait object alone can't expose.
pub fn scope_with_providers_and_handles(
    multimodal_responses: Vec<Result<String, CoachError>>,
    premium_responses: Vec<Result<String, CoachError>>,
    reply_responses: Vec<Result<String, CoachError>>,
) -> (RequestScope, Arc<ScriptedProvider>, Arc<ScriptedProvider>, Arc<ScriptedProvider>) {
    let multimodal = Arc::new(ScriptedProvider::new("multimodal", "gpt-5", multimodal_responses));
    let premium = Arc::new(ScriptedProvider::new("premium", "gpt-5-premium", premium_responses));
    let reply = Arc::new(ScriptedProvider::new("reply", "gpt-5", reply_responses));

    let providers = Providers {
        multimodal: multimodal.clone(),
        premium: premium.clone(),
        reply: reply.clone(),
    };

    let scope = RequestScope {
        config: OrchestratorConfig {
            arm_timeout_ms: 2_000,
            request_timeout_ms: 5_000,
            ..OrchestratorConfig::default()
        },
        cache: coach_cache::SessionCache::new(std::time::Duration::from_secs(3600)),
        providers,
        image_fetcher: Arc::new(FakeImageFetcher),
        prompt_store: Arc::new(FakePromptStore),
        strategy_pool: Arc::new(FixedStrategyPool),
        moderation: Arc::new(AlwaysPassModeration),
        metrics: None::<MetricsBus>,
        cancel: CancellationToken::new(),
    };

    (scope, multimodal, premium, reply)
}

pub fn merge_step_payload(url_marker: &str) -> String {
    format!(
        r#"{{
            "image": {{
                "url": "{url_marker}",
                "bubbles": [
                    {{"bbox": {{"x1": 0.1, "y1": 0.1, "x2": 0.3, "y2": 0.2}}, "text": "hey there", "speaker": "other"}},
                    {{"bbox": {{"x1": 0.6, "y1": 0.3, "x2": 0.9, "y2": 0.4}}, "text": "hi!", "speaker": "self"}}
                ],
                "dialogs": [
                    {{"speaker": "other", "text": "hey there"}},
                    {{"speaker": "self", "text": "hi!"}}
                ]
            }},
            "context": {{
                "conversation_summary": "friendly check-in",
                "emotion_state": "positive",
                "current_intimacy_level": 40,
                "risk_flags": []
            }},
            "scene": {{
                "relationship_state": "friendly",
                "current_scenario": "chit-chat",
                "recommended_scenario": "SAFE",
                "intimacy_level": 40,
                "risk_flags": [],
                "recommended_strategies": []
            }}
        }}"#
    )
}

pub fn reply_payload(texts: [&str; 3]) -> String {
    format!(
        r#"{{"replies": [
            {{"text": "{}", "strategy_code": "light_humor"}},
            {{"text": "{}", "strategy_code": "empathetic_ack"}},
            {{"text": "{}", "strategy_code": "curious_question"}}
        ]}}"#,
        texts[0], texts[1], texts[2]
    )
}
