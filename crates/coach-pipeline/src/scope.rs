//! The per-request scope (§5 "Ownership (design terms)"): C1 owns this
//! for the lifetime of one request, and every subordinate concurrent
//! operation — C2's per-item tasks, C3's race arms — derives its
//! cancellation token from the one held here. Nothing in this struct is
//! mutated; it is a bag of `Arc`s handed around by reference.

use std::sync::Arc;

use coach_cache::SessionCache;
use coach_core::{ImageFetcher, ModerationService, OrchestratorConfig, PromptStore, StrategyPool};
use coach_metrics::MetricsBus;
use tokio_util::sync::CancellationToken;

use crate::llm_provider::Providers;

pub struct RequestScope {
    pub config: OrchestratorConfig,
    pub cache: Arc<SessionCache>,
    pub providers: Providers,
    pub image_fetcher: Arc<dyn ImageFetcher>,
    pub prompt_store: Arc<dyn PromptStore>,
    pub strategy_pool: Arc<dyn StrategyPool>,
    pub moderation: Arc<dyn ModerationService>,
    pub metrics: Option<MetricsBus>,
    pub cancel: CancellationToken,
}

impl RequestScope {
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }
}
