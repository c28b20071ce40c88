//! Screenshot Analyzer — Merge Step (C2, §4.2): one multimodal LLM call
//! producing an `ImageResult`, `ContextResult` and `SceneAnalysisResult`
//! together, raced across two model tiers via C3.

use coach_core::model::{CacheCategory, CacheEvent, DispatchStrategy, ImageResult, ModelTag};
use coach_core::CoachError;
use coach_llm::{race, LlmRequest, RaceDeadlines};
use coach_normalize::{run_ladder, Normalizer, ParsedResult};

use crate::llm_provider::ProviderArm;
use crate::scope::RequestScope;
use crate::strategy::select_strategies;

pub struct MergeStepResult {
    pub image: ImageResult,
    pub context: coach_core::model::ContextResult,
    pub scene: coach_core::model::SceneAnalysisResult,
}

/// The parse-ladder's extractability (strategies 1-5 of §4.6, no
/// plain-text wrap) is the validity predicate both race arms share. The
/// spec leaves the exact per-arm validator underspecified (§9 Open
/// Questions) and instructs treating both arms identically for their task
/// type; full domain repair is applied afterward, only to the winner.
fn validates_merge_step(raw: &str) -> bool {
    run_ladder(raw, false, 0).is_some()
}

/// Runs the merge step for one image URL (§4.2). `session_id`/`scene`
/// key the cache; `dispatch_strategy` is recorded as metadata only.
pub async fn analyze(
    scope: &RequestScope,
    session_id: &str,
    scene: i64,
    language: &str,
    content_url: &str,
    force_regenerate: bool,
    dispatch_strategy: DispatchStrategy,
) -> Result<MergeStepResult, CoachError> {
    if let Some(cached) = probe_cache(scope, session_id, scene, content_url, force_regenerate) {
        return Ok(cached);
    }

    let fetched = scope.image_fetcher.fetch(content_url).await?;

    let template = scope
        .prompt_store
        .get("merge_step", None)
        .await
        .map_err(|error| CoachError::wrapped("analyzer", error))?;
    let prompt = format!(
        "{}\n\n[language={language}]\n[scene={scene}]\n[resource={content_url}]",
        template.body
    );

    let request = LlmRequest::with_image(prompt, fetched.clone());
    let arm_a: std::sync::Arc<dyn coach_llm::LlmArm> = decorate_arm(
        scope,
        ProviderArm::new(scope.providers.multimodal.clone(), request.clone()),
        scope.providers.multimodal.name(),
        scope.providers.multimodal.model(),
        &template.version_tag,
    );
    let arm_b: std::sync::Arc<dyn coach_llm::LlmArm> = decorate_arm(
        scope,
        ProviderArm::new(scope.providers.premium.clone(), request),
        scope.providers.premium.name(),
        scope.providers.premium.model(),
        &template.version_tag,
    );

    let deadlines = RaceDeadlines {
        arm_a: std::time::Duration::from_millis(scope.config.arm_timeout_ms),
        arm_b: std::time::Duration::from_millis(scope.config.arm_timeout_ms),
        overall: Some(std::time::Duration::from_millis(scope.config.request_timeout_ms)),
    };

    let winner = race(
        arm_a,
        arm_b,
        validates_merge_step,
        deadlines,
        &scope.cancel,
        scope.metrics.as_ref(),
    )
    .await?;

    let normalizer = match &scope.metrics {
        Some(bus) => Normalizer::with_metrics(bus.clone()),
        None => Normalizer::new(),
    };

    let (mut image, context, mut scene_result) =
        match normalizer.parse_merge_step(&winner.raw, fetched.width, fetched.height) {
            ParsedResult::Parsed(triple) | ParsedResult::Wrapped(triple) => triple,
            ParsedResult::ParseFailed(error) => return Err(error),
        };
    image.url = content_url.to_string();

    scene_result.recommended_strategies =
        select_strategies(scope.strategy_pool.as_ref(), &scene_result.recommended_scenario, None);

    if !scope.cancel.is_cancelled() {
        write_cache(scope, session_id, scene, content_url, &image, &context, &scene_result, dispatch_strategy);
    }

    Ok(MergeStepResult { image, context, scene: scene_result })
}

/// Wraps a provider arm with `coach_llm::MetricsDecoratedArm` when the
/// scope has a metrics bus, so every race arm's latency/status is
/// recorded per §7's Observability paragraph regardless of which arm
/// wins.
pub(crate) fn decorate_arm(
    scope: &RequestScope,
    inner: ProviderArm,
    provider: &str,
    model: &str,
    prompt_version: &str,
) -> std::sync::Arc<dyn coach_llm::LlmArm> {
    match &scope.metrics {
        Some(bus) => std::sync::Arc::new(coach_llm::MetricsDecoratedArm::new(
            std::sync::Arc::new(inner),
            provider,
            model,
            prompt_version,
            bus.clone(),
        )),
        None => std::sync::Arc::new(inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{merge_step_payload, scope_with_providers, scope_with_providers_and_handles};
    use coach_core::model::DispatchStrategy;

    #[tokio::test]
    async fn cache_miss_runs_the_race_and_writes_all_four_categories() {
        let scope = scope_with_providers(
            vec![Ok(merge_step_payload("https://img/a.png"))],
            vec![Err(CoachError::Timeout("premium too slow".to_string()))],
            vec![],
        );

        let result = analyze(&scope, "s1", 1, "en", "https://img/a.png", false, DispatchStrategy::Parallel)
            .await
            .unwrap();

        assert_eq!(result.image.url, "https://img/a.png");
        assert_eq!(result.image.bubbles.len(), 2);
        assert_eq!(result.scene.recommended_strategies.len(), 3);

        assert!(scope
            .cache
            .get_last("s1", 1, CacheCategory::CONTEXT_ANALYSIS, "https://img/a.png", false)
            .is_some());
        assert!(scope
            .cache
            .get_last("s1", 1, CacheCategory::SCENE_ANALYSIS, "https://img/a.png", false)
            .is_some());
        assert!(matches!(
            scope.cache.get_image_result("s1", 1, "https://img/a.png", false),
            coach_cache::CacheLookup::Hit(_)
        ));
    }

    #[tokio::test]
    async fn second_identical_request_hits_cache_and_issues_no_llm_call() {
        let (scope, multimodal, _premium, _reply) = scope_with_providers_and_handles(
            vec![Ok(merge_step_payload("https://img/a.png"))],
            vec![Err(CoachError::Timeout("premium too slow".to_string()))],
            vec![],
        );

        analyze(&scope, "s1", 1, "en", "https://img/a.png", false, DispatchStrategy::Parallel)
            .await
            .unwrap();
        let calls_after_first = multimodal.call_count();

        analyze(&scope, "s1", 1, "en", "https://img/a.png", false, DispatchStrategy::Parallel)
            .await
            .unwrap();
        let calls_after_second = multimodal.call_count();

        assert_eq!(calls_after_first, calls_after_second, "a cache hit must not invoke the merge-step LLM again");
    }

    #[tokio::test]
    async fn force_regenerate_bypasses_the_cache() {
        let (scope, multimodal, _premium, _reply) = scope_with_providers_and_handles(
            vec![
                Ok(merge_step_payload("https://img/a.png")),
                Ok(merge_step_payload("https://img/a.png")),
            ],
            vec![Err(CoachError::Timeout("premium too slow".to_string())); 2],
            vec![],
        );

        analyze(&scope, "s1", 1, "en", "https://img/a.png", false, DispatchStrategy::Parallel)
            .await
            .unwrap();
        let before = multimodal.call_count();

        analyze(&scope, "s1", 1, "en", "https://img/a.png", true, DispatchStrategy::Parallel)
            .await
            .unwrap();
        let after = multimodal.call_count();

        assert!(after > before, "force_regenerate must re-run the merge step");
    }
}

fn probe_cache(
    scope: &RequestScope,
    session_id: &str,
    scene: i64,
    resource: &str,
    force_regenerate: bool,
) -> Option<MergeStepResult> {
    let context_payload = scope.cache.get_last(
        session_id,
        scene,
        CacheCategory::CONTEXT_ANALYSIS,
        resource,
        force_regenerate,
    )?;
    let scene_payload = scope.cache.get_last(
        session_id,
        scene,
        CacheCategory::SCENE_ANALYSIS,
        resource,
        force_regenerate,
    )?;

    let context: coach_core::model::ContextResult = serde_json::from_value(context_payload).ok()?;
    let scene_result: coach_core::model::SceneAnalysisResult = serde_json::from_value(scene_payload).ok()?;

    let image = match scope.cache.get_image_result(session_id, scene, resource, force_regenerate) {
        coach_cache::CacheLookup::Hit(image) | coach_cache::CacheLookup::RepairedHit(image) => image,
        coach_cache::CacheLookup::Miss => return None,
    };

    Some(MergeStepResult { image, context, scene: scene_result })
}

#[allow(clippy::too_many_arguments)]
fn write_cache(
    scope: &RequestScope,
    session_id: &str,
    scene: i64,
    resource: &str,
    image: &ImageResult,
    context: &coach_core::model::ContextResult,
    scene_result: &coach_core::model::SceneAnalysisResult,
    dispatch_strategy: DispatchStrategy,
) {
    let strategy = Some(dispatch_strategy);
    let model = Some(ModelTag::MergeStep);
    let now = chrono::Utc::now();

    scope.cache.append(CacheEvent {
        session_id: session_id.to_string(),
        scene,
        category: CacheCategory::new(CacheCategory::CONTEXT_ANALYSIS),
        resource: resource.to_string(),
        payload: serde_json::to_value(context).unwrap_or(serde_json::Value::Null),
        ts: now,
        model,
        strategy,
    });
    scope.cache.append(CacheEvent {
        session_id: session_id.to_string(),
        scene,
        category: CacheCategory::new(CacheCategory::SCENE_ANALYSIS),
        resource: resource.to_string(),
        payload: serde_json::to_value(scene_result).unwrap_or(serde_json::Value::Null),
        ts: now,
        model,
        strategy,
    });
    scope.cache.append(CacheEvent {
        session_id: session_id.to_string(),
        scene,
        category: CacheCategory::new(CacheCategory::IMAGE_RESULT),
        resource: resource.to_string(),
        payload: serde_json::to_value(image).unwrap_or(serde_json::Value::Null),
        ts: now,
        model,
        strategy,
    });
    scope.cache.append(CacheEvent {
        session_id: session_id.to_string(),
        scene,
        category: CacheCategory::new(CacheCategory::IMAGE_DIMENSIONS),
        resource: resource.to_string(),
        payload: serde_json::json!({"width": image.width, "height": image.height}),
        ts: now,
        model,
        strategy,
    });
}
