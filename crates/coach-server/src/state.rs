//! Wires every collaborator into one `AppState`, following the teacher's
//! `agent-server::state::AppState` shape: a single struct of `Arc<dyn
//! Trait>` handles constructed once at startup and cloned into
//! `actix_web::web::Data` for every handler.

use std::sync::Arc;
use std::time::Duration;

use coach_cache::SessionCache;
use coach_core::{ImageFetcher, ModerationService, OrchestratorConfig, PromptStore, StrategyPool};
use coach_metrics::{MetricsAggregator, MetricsBus, MetricsStorage, MetricsWorker, NullMetricsStorage, SqliteMetricsStorage};
use coach_pipeline::{DefaultStrategyPool, Providers, ReqwestImageFetcher};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::llm_client::OpenAiCompatProvider;
use crate::moderation::HeuristicModerationService;
use crate::prompt_store::StaticPromptStore;

pub struct AppState {
    pub config: OrchestratorConfig,
    pub cache: Arc<SessionCache>,
    pub providers: Providers,
    pub image_fetcher: Arc<dyn ImageFetcher>,
    pub prompt_store: Arc<dyn PromptStore>,
    pub strategy_pool: Arc<dyn StrategyPool>,
    pub moderation: Arc<dyn ModerationService>,
    pub metrics: MetricsBus,
    pub aggregator: Arc<MetricsAggregator>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let (metrics, rx) = MetricsBus::new(config.metrics_bus_capacity);
        let aggregator = Arc::new(MetricsAggregator::default());

        let storage: Arc<dyn MetricsStorage> = match &config.metrics_db_path {
            Some(path) => match SqliteMetricsStorage::open(path) {
                Ok(storage) => Arc::new(storage),
                Err(error) => {
                    log::warn!("failed to open metrics database at {path}: {error}, falling back to an in-memory sink");
                    Arc::new(NullMetricsStorage)
                }
            },
            None => Arc::new(NullMetricsStorage),
        };
        let worker = MetricsWorker::new(storage, Arc::clone(&aggregator));
        worker.spawn(rx);

        let cache = SessionCache::with_metrics(
            Duration::from_secs(config.orchestrator.cache_ttl_seconds),
            metrics.clone(),
        );
        cache.spawn_ttl_sweeper(Duration::from_secs(60));

        let providers = Providers {
            multimodal: Arc::new(OpenAiCompatProvider::new(
                "multimodal",
                config.multimodal.base_url.clone(),
                config.multimodal.api_key.clone(),
                config.multimodal.model.clone(),
            )),
            premium: Arc::new(OpenAiCompatProvider::new(
                "premium",
                config.premium.base_url.clone(),
                config.premium.api_key.clone(),
                config.premium.model.clone(),
            )),
            reply: Arc::new(OpenAiCompatProvider::new(
                "reply",
                config.reply.base_url.clone(),
                config.reply.api_key.clone(),
                config.reply.model.clone(),
            )),
        };

        Self {
            config: config.orchestrator,
            cache,
            providers,
            image_fetcher: Arc::new(ReqwestImageFetcher::default()),
            prompt_store: Arc::new(StaticPromptStore::new()),
            strategy_pool: Arc::new(DefaultStrategyPool),
            moderation: Arc::new(HeuristicModerationService),
            metrics,
            aggregator,
        }
    }

    /// Builds a fresh per-request scope (§5 "Ownership"): C1 owns this for
    /// the lifetime of one request and every subordinate task derives its
    /// cancellation token from it.
    pub fn new_scope(&self) -> coach_pipeline::RequestScope {
        coach_pipeline::RequestScope {
            config: self.config.clone(),
            cache: Arc::clone(&self.cache),
            providers: Providers {
                multimodal: Arc::clone(&self.providers.multimodal),
                premium: Arc::clone(&self.providers.premium),
                reply: Arc::clone(&self.providers.reply),
            },
            image_fetcher: Arc::clone(&self.image_fetcher),
            prompt_store: Arc::clone(&self.prompt_store),
            strategy_pool: Arc::clone(&self.strategy_pool),
            moderation: Arc::clone(&self.moderation),
            metrics: Some(self.metrics.clone()),
            cancel: CancellationToken::new(),
        }
    }
}
