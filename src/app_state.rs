//! Shared application state.

use crate::auth::AuthMediator;
use crate::cache::CacheBroker;
use crate::cli::CommandLineArgs;
use crate::config::ServerConfig;
use crate::error::FrevaRestError;
use crate::flavour::FlavourRegistry;
use crate::solr::Solr;
use crate::stats::StatsQueue;
use crate::store::MongoStore;

use std::sync::Arc;

/// Shared application state passed to each request handler.
pub struct AppState {
    /// Resolved server configuration.
    pub config: ServerConfig,

    /// Search index adapter.
    pub solr: Solr,

    /// Document store handle.
    pub store: MongoStore,

    /// Cache/broker handle; only connected when the zarr-stream service is
    /// enabled.
    cache: Option<CacheBroker>,

    /// OIDC authentication mediator.
    pub auth: AuthMediator,

    /// Flavour registry.
    pub flavours: FlavourRegistry,

    /// Statistics queue.
    pub stats: StatsQueue,
}

impl AppState {
    /// Create and return an [AppState], connecting to the external
    /// collaborators the enabled services need.
    pub async fn new(args: &CommandLineArgs) -> Result<Self, FrevaRestError> {
        let config = ServerConfig::new(args)?;
        let store = MongoStore::new(&config).await?;
        let cache = if config.service_enabled("zarr-stream") {
            Some(CacheBroker::connect(&config).await?)
        } else {
            None
        };
        let solr = Solr::new(config.clone(), store.clone());
        let auth = AuthMediator::new(config.clone());
        let flavours = FlavourRegistry::new(store.clone());
        let stats = StatsQueue::new(store.clone());
        Ok(Self {
            config,
            solr,
            store,
            cache,
            auth,
            flavours,
            stats,
        })
    }

    /// The cache/broker handle, or `BACKEND_UNAVAILABLE` when the
    /// zarr-stream service is disabled.
    pub fn cache(&self) -> Result<&CacheBroker, FrevaRestError> {
        self.cache.as_ref().ok_or_else(|| {
            FrevaRestError::BackendUnavailable("service not enabled".to_string())
        })
    }
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;
