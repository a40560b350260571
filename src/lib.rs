//! Divan: Persian/English poem feed core.
//! Upstream acquisition behind a circuit breaker, cache-first LLM translation,
//! two-tier tafsir explanations, and a progressively revealed feed.

pub mod auth;
pub mod breaker;
pub mod cancellation;
pub mod config;
pub mod explain;
pub mod favorites;
pub mod feed;
pub mod metrics;
pub mod poem;
pub mod source;
pub mod store;
pub mod translate;

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use breaker::CircuitBreaker;
use config::{ConfigError, FeedConfig};
use explain::remote::{ExplainBackend, HttpExplainBackend};
use explain::{ExplainError, ExplanationService};
use favorites::FavoritesStore;
use feed::{FeedController, FeedServices};
use metrics::MetricsRegistry;
use source::http::HttpUpstream;
use source::{FetchFailure, SourceClient};
use store::{KeyValueStore, MemoryStore, SqliteStore, StoreError};
use translate::llm::ChatCompletionClient;
use translate::poets::PoetNames;
use translate::{CompletionBackend, TranslationService};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("upstream client: {0}")]
    Upstream(#[from] FetchFailure),
    #[error("explanation client: {0}")]
    Explain(#[from] ExplainError),
}

/// Everything a front end needs, wired from one config.
pub struct AppContext {
    pub config: FeedConfig,
    pub feed: FeedController,
    pub favorites: FavoritesStore,
    pub store: Arc<dyn KeyValueStore>,
    pub metrics: Arc<MetricsRegistry>,
}

/// `RUST_LOG` wins; otherwise debug for this crate.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("divan=debug")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

impl AppContext {
    pub fn build(config: FeedConfig) -> Result<Self, StartupError> {
        let metrics = Arc::new(MetricsRegistry::new());

        let store: Arc<dyn KeyValueStore> = match &config.cache_path {
            Some(path) => Arc::new(SqliteStore::open(path)?),
            None => {
                info!("no cache path configured, translations live for this process only");
                Arc::new(MemoryStore::new())
            }
        };

        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker_threshold,
            config.breaker_cooldown,
        ));
        let source = Arc::new(SourceClient::new(
            Arc::new(HttpUpstream::new(config.source_base_url.clone())?),
            breaker,
            Arc::clone(&metrics),
            &config,
        ));

        let poets = PoetNames::load_with_file(Path::new("poets/default.json")).unwrap_or_else(|e| {
            warn!(error = %e, "poet names file unavailable, using built-in table");
            PoetNames::builtin()
        });

        let translator = match config.llm_api_key.as_deref().map(|key| {
            ChatCompletionClient::new(config.llm_base_url.clone(), key, config.llm_model.clone())
        }) {
            Some(Ok(client)) => {
                info!(model = %config.llm_model, "translation client initialized");
                Some(Arc::new(TranslationService::new(
                    Arc::new(client) as Arc<dyn CompletionBackend>,
                    Arc::clone(&store),
                    poets,
                    Arc::clone(&metrics),
                    &config,
                )))
            }
            Some(Err(e)) => {
                warn!(error = %e, "translation client init failed, translation disabled");
                None
            }
            None => {
                warn!("DIVAN_LLM_API_KEY not set, translation disabled");
                None
            }
        };

        let explain_backend: Option<Arc<dyn ExplainBackend>> = if config.offline {
            info!("offline mode, explanations use the local tier only");
            None
        } else {
            Some(Arc::new(HttpExplainBackend::new(config.explain_base_url.clone())?))
        };
        let explainer = Arc::new(ExplanationService::new(
            explain_backend,
            Arc::clone(&metrics),
            &config,
        ));

        let feed = FeedController::new(
            FeedServices {
                source,
                translator,
                explainer,
                store: Arc::clone(&store),
                metrics: Arc::clone(&metrics),
            },
            config.clone(),
        );

        Ok(Self {
            config,
            feed,
            favorites: FavoritesStore::new(Arc::clone(&store)),
            store,
            metrics,
        })
    }
}
