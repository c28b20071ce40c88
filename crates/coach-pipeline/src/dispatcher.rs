//! Request Dispatcher (C1, §4.1): turns one request into an ordered
//! sequence of per-content results, then optionally into a reply set.

use std::sync::Arc;

use coach_core::model::{
    AnalyzeRequest, AnalyzeResponse, ContentItem, ContentResult, Dialog, DispatchStrategy, Speaker,
};
use coach_core::CoachError;
use coach_metrics::{DispatchEvent, EventMeta, MetricsEvent};
use futures::future::try_join_all;

use crate::analyzer::{self, MergeStepResult};
use crate::reply::{self, ReplyContext};
use crate::scope::RequestScope;

enum ProcessedItem {
    Text(String),
    Image(MergeStepResult),
}

struct IndexedItem {
    index: usize,
    #[allow(dead_code)]
    item: ContentItem,
    processed: ProcessedItem,
}

pub async fn dispatch(scope: Arc<RequestScope>, request: &AnalyzeRequest) -> Result<AnalyzeResponse, CoachError> {
    let start = std::time::Instant::now();
    let items: Vec<ContentItem> = request.content.iter().map(|raw| ContentItem::classify(raw)).collect();

    if items.is_empty() {
        return Ok(AnalyzeResponse {
            success: true,
            message: "no content supplied".to_string(),
            results: Vec::new(),
            suggested_replies: None,
        });
    }

    let contains_image = items.iter().any(ContentItem::is_image);
    let use_parallel = scope.config.use_parallel(contains_image);
    let dispatch_strategy = if use_parallel { DispatchStrategy::Parallel } else { DispatchStrategy::Serial };

    let result = if use_parallel {
        dispatch_parallel(Arc::clone(&scope), request, items, dispatch_strategy).await
    } else {
        dispatch_serial(&scope, request, items, dispatch_strategy).await
    };

    let mut indexed = match result {
        Ok(indexed) => indexed,
        Err(error) => {
            emit_dispatch_event(&scope, &request.session_id, request.content.len(), use_parallel, start, false);
            return Err(error);
        }
    };
    indexed.sort_by_key(|entry| entry.index);

    let results: Vec<ContentResult> = indexed
        .iter()
        .map(|entry| match &entry.processed {
            ProcessedItem::Text(text) => ContentResult {
                content: text.clone(),
                dialogs: vec![Dialog { speaker: Speaker::Other, text: text.clone(), timestamp: None }],
                scenario: String::new(),
            },
            ProcessedItem::Image(merge) => ContentResult {
                content: merge.image.url.clone(),
                dialogs: merge.image.dialogs.clone(),
                scenario: merge.image.scenario_json.clone(),
            },
        })
        .collect();

    emit_dispatch_event(&scope, &request.session_id, request.content.len(), use_parallel, start, true);

    let suggested_replies = if request.reply {
        Some(generate_reply(&scope, request, &indexed).await?)
    } else {
        None
    };

    Ok(AnalyzeResponse {
        success: true,
        message: "ok".to_string(),
        results,
        suggested_replies,
    })
}

async fn dispatch_parallel(
    scope: Arc<RequestScope>,
    request: &AnalyzeRequest,
    items: Vec<ContentItem>,
    dispatch_strategy: DispatchStrategy,
) -> Result<Vec<IndexedItem>, CoachError> {
    let session_id = request.session_id.clone();
    let scene = request.scene;
    let language = request.language.clone();
    let force_regenerate = request.force_regenerate;

    let tasks = items.into_iter().enumerate().map(|(index, item)| {
        let scope = Arc::clone(&scope);
        let session_id = session_id.clone();
        let language = language.clone();
        tokio::spawn(async move {
            let processed = process_item(&scope, &session_id, scene, &language, force_regenerate, dispatch_strategy, &item).await?;
            Ok::<IndexedItem, CoachError>(IndexedItem { index, item, processed })
        })
    });

    let joined = try_join_all(tasks)
        .await
        .map_err(|error| CoachError::wrapped("dispatcher", CoachError::Timeout(error.to_string())))?;

    joined.into_iter().collect::<Result<Vec<_>, _>>()
}

async fn dispatch_serial(
    scope: &Arc<RequestScope>,
    request: &AnalyzeRequest,
    items: Vec<ContentItem>,
    dispatch_strategy: DispatchStrategy,
) -> Result<Vec<IndexedItem>, CoachError> {
    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let processed = process_item(
            scope,
            &request.session_id,
            request.scene,
            &request.language,
            request.force_regenerate,
            dispatch_strategy,
            &item,
        )
        .await?;
        out.push(IndexedItem { index, item, processed });
    }
    Ok(out)
}

async fn process_item(
    scope: &RequestScope,
    session_id: &str,
    scene: i64,
    language: &str,
    force_regenerate: bool,
    dispatch_strategy: DispatchStrategy,
    item: &ContentItem,
) -> Result<ProcessedItem, CoachError> {
    match item {
        ContentItem::Text(text) => Ok(ProcessedItem::Text(text.clone())),
        ContentItem::Image(url) => {
            let merge = analyzer::analyze(scope, session_id, scene, language, url, force_regenerate, dispatch_strategy).await?;
            Ok(ProcessedItem::Image(merge))
        }
    }
}

/// Derives the reply target from the ordered items (§4.1 "Ordering
/// guarantee"): if the last item is text, it is the reply sentence
/// verbatim; if it is an image, the reply sentence is the last
/// `other`-speaker utterance in that image's dialogs.
async fn generate_reply(
    scope: &RequestScope,
    request: &AnalyzeRequest,
    indexed: &[IndexedItem],
) -> Result<Vec<coach_core::model::ReplyCandidate>, CoachError> {
    let last = indexed.last().expect("dispatch already returned early for empty content");

    let (resource, reply_sentence, dialogs, scene_analysis) = match &last.processed {
        ProcessedItem::Text(text) => {
            let dialogs = vec![Dialog { speaker: Speaker::Other, text: text.clone(), timestamp: None }];
            let scene_analysis = last_image_scene(indexed).unwrap_or_else(default_text_only_scene);
            (text.clone(), text.clone(), dialogs, scene_analysis)
        }
        ProcessedItem::Image(merge) => {
            let reply_sentence = merge
                .image
                .dialogs
                .iter()
                .rev()
                .find(|dialog| dialog.speaker == Speaker::Other)
                .or_else(|| merge.image.dialogs.last())
                .map(|dialog| dialog.text.clone())
                .unwrap_or_default();
            (merge.image.url.clone(), reply_sentence, merge.image.dialogs.clone(), merge.scene.clone())
        }
    };

    let ctx = ReplyContext {
        session_id: request.session_id.clone(),
        scene: request.scene,
        resource,
        reply_sentence,
        dialogs,
        scene_analysis,
        language: request.language.clone(),
        force_regenerate: request.force_regenerate,
    };

    reply::generate(scope, &ctx).await
}

/// Finds the most recently produced image's scene classification, used
/// when the last item is text but earlier items in the same dispatch
/// carried image analysis (§4.5 Inputs: "...or to the aggregated context
/// if the last item is text").
fn last_image_scene(indexed: &[IndexedItem]) -> Option<coach_core::model::SceneAnalysisResult> {
    indexed.iter().rev().find_map(|entry| match &entry.processed {
        ProcessedItem::Image(merge) => Some(merge.scene.clone()),
        ProcessedItem::Text(_) => None,
    })
}

/// When a request is all-text, no C2 call has happened and there is no
/// scene classification to aggregate from. Rather than invoke an LLM call
/// purely to classify plain text (out of scope per §1: "the design does
/// not specify chat-UI rendering" / scope is screenshot-driven), the
/// reply pipeline falls back to a conservative default: neutral emotion,
/// mid-range intimacy, the SAFE scenario. This is a documented Open
/// Question resolution (see DESIGN.md).
fn default_text_only_scene() -> coach_core::model::SceneAnalysisResult {
    coach_core::model::SceneAnalysisResult {
        relationship_state: "维持".to_string(),
        current_scenario: String::new(),
        recommended_scenario: coach_core::model::RecommendedScenario::Safe,
        intimacy_level: 50,
        risk_flags: Vec::new(),
        recommended_strategies: Vec::new(),
    }
}


fn emit_dispatch_event(
    scope: &RequestScope,
    session_id: &str,
    item_count: usize,
    parallel: bool,
    start: std::time::Instant,
    success: bool,
) {
    if let Some(bus) = &scope.metrics {
        bus.emit(MetricsEvent::Dispatch(DispatchEvent {
            meta: EventMeta::new(None),
            session_id: session_id.to_string(),
            item_count,
            parallel,
            latency_ms: start.elapsed().as_millis() as u64,
            success,
        }));
    }
}
