use std::sync::Arc;

use crate::DbPool;
use crate::config::Config;
use crate::middleware::auth::Authenticator;
use crate::services::arbiter::ConcurrencyArbiter;
use crate::services::decoder::DocumentDecoder;
use crate::services::embedder::EmbedderRegistry;
use crate::services::export::ExportRenderer;
use crate::services::llm::router::LlmRouter;

/// Application state shared across all HTTP handlers.
///
/// Everything here is a process-scoped handle built once at startup: the
/// connection pool, the embedder registry, the LLM provider router, the
/// concurrency arbiter, and the external-collaborator seams (decoder,
/// authenticator, export renderer).
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
    pub embedders: Arc<EmbedderRegistry>,
    pub llm: Arc<LlmRouter>,
    pub arbiter: Arc<ConcurrencyArbiter>,
    pub decoder: Arc<dyn DocumentDecoder>,
    pub authenticator: Arc<dyn Authenticator>,
    pub exporter: Arc<dyn ExportRenderer>,
}

impl AppState {
    pub fn new(
        pool: DbPool,
        config: Config,
        decoder: Arc<dyn DocumentDecoder>,
        authenticator: Arc<dyn Authenticator>,
        exporter: Arc<dyn ExportRenderer>,
    ) -> Self {
        let embedders = Arc::new(EmbedderRegistry::new(config.ai.embedding_dimension));
        let llm = Arc::new(LlmRouter::from_config(&config.ai));
        let arbiter = Arc::new(ConcurrencyArbiter::new(
            &config.locks,
            config.ai.local_max_parallel,
        ));

        Self {
            pool,
            config: Arc::new(config),
            embedders,
            llm,
            arbiter,
            decoder,
            authenticator,
            exporter,
        }
    }

    /// Replaces the provider router, keeping everything else. Used by tests
    /// to route chat turns through scripted providers.
    pub fn with_llm_router(mut self, llm: Arc<LlmRouter>) -> Self {
        self.llm = llm;
        self
    }
}
