//! Reply Pipeline (C5, §4.5): cache probe, strategy-bound retry loop
//! against the reply LLM, per-attempt moderation check, commit-on-pass.

use coach_core::model::{CacheCategory, CacheEvent, Dialog, ModerationVerdict, ReplyCandidate, SceneAnalysisResult};
use coach_core::{intimacy_stage, CoachError};
use coach_llm::LlmRequest;
use coach_metrics::{EventMeta, MetricsEvent, ModerationEvent as MetricsModerationEvent, RetryEvent};
use coach_normalize::{Normalizer, ParsedResult};

use crate::analyzer::decorate_arm;
use crate::llm_provider::ProviderArm;
use crate::scope::RequestScope;

/// Everything the reply generator needs about "the last content item"
/// (§4.5 Inputs): the sentence being replied to, the dialogs behind it,
/// and the scene/context classification that governs strategy and
/// moderation.
pub struct ReplyContext {
    pub session_id: String,
    pub scene: i64,
    pub resource: String,
    pub reply_sentence: String,
    pub dialogs: Vec<Dialog>,
    pub scene_analysis: SceneAnalysisResult,
    pub language: String,
    pub force_regenerate: bool,
}

pub async fn generate(scope: &RequestScope, ctx: &ReplyContext) -> Result<Vec<ReplyCandidate>, CoachError> {
    if let Some(cached) = scope.cache.get_last(
        &ctx.session_id,
        ctx.scene,
        CacheCategory::REPLY,
        &ctx.resource,
        ctx.force_regenerate,
    ) {
        if let Ok(candidates) = serde_json::from_value::<Vec<ReplyCandidate>>(cached) {
            return Ok(candidates);
        }
    }

    let template = scope
        .prompt_store
        .get("reply_generation", None)
        .await
        .map_err(|error| CoachError::wrapped("reply_pipeline", error))?;
    let stage = intimacy_stage(ctx.scene_analysis.intimacy_level);
    let strategies = ctx.scene_analysis.recommended_strategies.join(", ");

    let mut last_error = CoachError::RetryExhausted {
        attempts: 0,
        reason: "no attempts were made".to_string(),
    };

    for attempt in 1..=scope.config.max_retries {
        let prompt = format!(
            "{}\n\n[language={}]\n[strategies={strategies}]\n[reply_to={}]",
            template.body, ctx.language, ctx.reply_sentence
        );

        let arm = decorate_arm(
            scope,
            ProviderArm::new(scope.providers.reply.clone(), LlmRequest::text(prompt)),
            scope.providers.reply.name(),
            scope.providers.reply.model(),
            &template.version_tag,
        );

        let raw = match arm.call(scope.child_token()).await {
            Ok(raw) => raw,
            Err(error) => {
                emit_retry(scope, &ctx.session_id, attempt, false);
                last_error = error;
                continue;
            }
        };

        let normalizer = match &scope.metrics {
            Some(bus) => Normalizer::with_metrics(bus.clone()),
            None => Normalizer::new(),
        };

        let parsed = normalizer.parse_reply(&raw, scope.config.plain_text_wrap_threshold);
        let (candidates, wrapped) = match parsed {
            ParsedResult::Parsed(candidates) => (candidates, false),
            ParsedResult::Wrapped(candidates) => (candidates, true),
            ParsedResult::ParseFailed(error) => {
                emit_retry(scope, &ctx.session_id, attempt, false);
                last_error = error;
                continue;
            }
        };

        // §4.5 "exactly three are required ... if more, the first three
        // are taken": the plain-text wrap fallback is the one documented
        // exception (§8 S6) — it always produces a single candidate and
        // that single-candidate set is accepted as structurally valid.
        let candidates = if wrapped {
            candidates
        } else if candidates.len() < 3 {
            emit_retry(scope, &ctx.session_id, attempt, false);
            last_error = CoachError::JsonParseExhausted(format!(
                "reply set had {} candidates, need 3",
                candidates.len()
            ));
            continue;
        } else {
            candidates.into_iter().take(3).collect()
        };

        if !scope.config.intimacy_check_enabled {
            emit_retry(scope, &ctx.session_id, attempt, true);
            commit(scope, ctx, &candidates);
            return Ok(candidates);
        }

        match scope.moderation.check(&candidates, stage).await {
            Ok(verdict) if verdict.passes() => {
                emit_moderation(scope, &ctx.session_id, attempt, verdict);
                emit_retry(scope, &ctx.session_id, attempt, true);
                commit(scope, ctx, &candidates);
                return Ok(candidates);
            }
            Ok(verdict) => {
                emit_moderation(scope, &ctx.session_id, attempt, verdict);
                emit_retry(scope, &ctx.session_id, attempt, false);
                last_error = CoachError::ModerationReject(format!("{verdict:?}"));
            }
            Err(error) if scope.config.moderation_fail_open => {
                tracing::warn!(%error, "moderation service unavailable, accepting on fail-open");
                emit_retry(scope, &ctx.session_id, attempt, true);
                commit(scope, ctx, &candidates);
                return Ok(candidates);
            }
            Err(error) => {
                emit_retry(scope, &ctx.session_id, attempt, false);
                last_error = CoachError::ModerationUnavailable(error.to_string());
            }
        }
    }

    Err(CoachError::RetryExhausted {
        attempts: scope.config.max_retries,
        reason: last_error.to_string(),
    })
}

fn commit(scope: &RequestScope, ctx: &ReplyContext, candidates: &[ReplyCandidate]) {
    if scope.cancel.is_cancelled() {
        return;
    }
    scope.cache.append(CacheEvent {
        session_id: ctx.session_id.clone(),
        scene: ctx.scene,
        category: CacheCategory::new(CacheCategory::REPLY),
        resource: ctx.resource.clone(),
        payload: serde_json::to_value(candidates).unwrap_or(serde_json::Value::Null),
        ts: chrono::Utc::now(),
        model: None,
        strategy: None,
    });
}

fn emit_retry(scope: &RequestScope, session_id: &str, attempt: u32, succeeded: bool) {
    if let Some(bus) = &scope.metrics {
        bus.emit(MetricsEvent::Retry(RetryEvent {
            meta: EventMeta::new(None),
            session_id: session_id.to_string(),
            attempt,
            max_attempts: scope.config.max_retries,
            succeeded,
        }));
    }
}

fn emit_moderation(scope: &RequestScope, session_id: &str, attempt: u32, verdict: ModerationVerdict) {
    if let Some(bus) = &scope.metrics {
        bus.emit(MetricsEvent::Moderation(MetricsModerationEvent {
            meta: EventMeta::new(None),
            session_id: session_id.to_string(),
            verdict: format!("{verdict:?}"),
            attempt,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{
        reply_payload, scope_with_providers, scope_with_providers_and_handles, ScriptedModeration,
    };
    use coach_core::model::RecommendedScenario;

    fn sample_ctx(resource: &str) -> ReplyContext {
        ReplyContext {
            session_id: "s1".to_string(),
            scene: 1,
            resource: resource.to_string(),
            reply_sentence: "hey there".to_string(),
            dialogs: vec![Dialog { speaker: coach_core::model::Speaker::Other, text: "hey there".to_string(), timestamp: None }],
            scene_analysis: SceneAnalysisResult {
                relationship_state: "friendly".to_string(),
                current_scenario: "chit-chat".to_string(),
                recommended_scenario: RecommendedScenario::Safe,
                intimacy_level: 40,
                risk_flags: Vec::new(),
                recommended_strategies: vec!["light_humor".to_string()],
            },
            language: "en".to_string(),
            force_regenerate: false,
        }
    }

    #[tokio::test]
    async fn first_valid_attempt_commits_exactly_three_candidates() {
        let scope = scope_with_providers(vec![], vec![], vec![Ok(reply_payload(["a", "b", "c"]))]);
        let candidates = generate(&scope, &sample_ctx("https://img/a.png")).await.unwrap();

        assert_eq!(candidates.len(), 3);
        assert!(scope
            .cache
            .get_last("s1", 1, CacheCategory::REPLY, "https://img/a.png", false)
            .is_some());
    }

    #[tokio::test]
    async fn second_identical_request_hits_the_reply_cache() {
        let (scope, _m, _p, reply_provider) =
            scope_with_providers_and_handles(vec![], vec![], vec![Ok(reply_payload(["a", "b", "c"]))]);

        generate(&scope, &sample_ctx("https://img/a.png")).await.unwrap();
        let calls_after_first = reply_provider.call_count();

        generate(&scope, &sample_ctx("https://img/a.png")).await.unwrap();
        assert_eq!(reply_provider.call_count(), calls_after_first);
    }

    #[tokio::test]
    async fn moderation_rejects_twice_then_passes_on_third_attempt() {
        let mut scope = scope_with_providers(
            vec![],
            vec![],
            vec![
                Ok(reply_payload(["a1", "b1", "c1"])),
                Ok(reply_payload(["a2", "b2", "c2"])),
                Ok(reply_payload(["a3", "b3", "c3"])),
            ],
        );
        let moderation = std::sync::Arc::new(ScriptedModeration::new(vec![
            ModerationVerdict::Warn,
            ModerationVerdict::Warn,
            ModerationVerdict::Pass,
        ]));
        scope.moderation = moderation.clone();

        let candidates = generate(&scope, &sample_ctx("https://img/a.png")).await.unwrap();

        assert_eq!(moderation.call_count(), 3);
        assert_eq!(candidates[0].text, "a3");
    }

    #[tokio::test]
    async fn plain_text_reply_is_wrapped_and_not_retried() {
        let (scope, _m, _p, reply_provider) =
            scope_with_providers_and_handles(vec![], vec![], vec![Ok("好的，我明白了。".to_string())]);

        let candidates = generate(&scope, &sample_ctx("https://img/a.png")).await.unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].strategy_code, "direct_response");
        assert_eq!(reply_provider.call_count(), 1);
    }

    #[tokio::test]
    async fn moderation_is_invoked_at_most_max_retries_times() {
        let mut scope = scope_with_providers(
            vec![],
            vec![],
            vec![Ok(reply_payload(["a", "b", "c"])); 3],
        );
        scope.config.max_retries = 3;
        let moderation = std::sync::Arc::new(ScriptedModeration::new(vec![ModerationVerdict::Warn; 5]));
        scope.moderation = moderation.clone();

        let error = generate(&scope, &sample_ctx("https://img/a.png")).await.unwrap_err();

        assert!(matches!(error, CoachError::RetryExhausted { attempts: 3, .. }));
        assert_eq!(moderation.call_count(), 3);
    }

    #[tokio::test]
    async fn fewer_than_three_candidates_triggers_a_retry() {
        let short_payload = r#"{"replies": [{"text": "only one", "strategy_code": "light_humor"}]}"#;
        let scope = scope_with_providers(
            vec![],
            vec![],
            vec![Ok(short_payload.to_string()), Ok(reply_payload(["a", "b", "c"]))],
        );

        let candidates = generate(&scope, &sample_ctx("https://img/a.png")).await.unwrap();
        assert_eq!(candidates.len(), 3);
    }
}
