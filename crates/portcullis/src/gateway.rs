//! Wiring of the pipeline and the rebuild engine from configuration.

use std::sync::Arc;

use portcullis_cache::{
    CacheError, CacheRebuilder, CacheStore, MemoryStore, RebuildReport, RedisStore,
    SourceRegistry, StoreError, StoreResult,
};
use portcullis_config::{PortcullisConfig, StoreConfig, StoreKind};
use portcullis_crypto::{SecretResolver, SecretSource};
use portcullis_middleware::{BoxFuture, MiddlewareContext, Pipeline, Request, Response};
use portcullis_telemetry::TelemetryResult;
use tracing::info;

/// The request pipeline, the secret resolver and the cache rebuilder, all
/// sharing one cache store.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use portcullis::{Gateway, PortcullisConfig};
/// use portcullis::cache::{MemoryStore, SourceRegistry};
/// use portcullis::crypto::StaticSecretSource;
///
/// let gateway = Gateway::from_config(
///     &PortcullisConfig::default(),
///     Arc::new(MemoryStore::new()),
///     Arc::new(StaticSecretSource::new()),
///     SourceRegistry::new(),
/// );
/// assert_eq!(gateway.pipeline().stage_count(), 5);
/// ```
pub struct Gateway {
    pipeline: Pipeline,
    resolver: Arc<SecretResolver>,
    rebuilder: CacheRebuilder,
    store: Arc<dyn CacheStore>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("pipeline", &self.pipeline)
            .field("resolver", &self.resolver)
            .field("rebuilder", &self.rebuilder)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Builds the gateway.
    ///
    /// `secrets` is the source of truth for key material and `sources` holds
    /// the data sources named by the cache registry.
    #[must_use]
    pub fn from_config(
        config: &PortcullisConfig,
        store: Arc<dyn CacheStore>,
        secrets: Arc<dyn SecretSource>,
        sources: SourceRegistry,
    ) -> Self {
        let resolver = Arc::new(SecretResolver::new(
            Arc::clone(&store),
            secrets,
            config.cache.secrets.clone(),
        ));
        let pipeline = Pipeline::standard(&config.pipeline, Arc::clone(&resolver));
        let rebuilder = CacheRebuilder::new(
            Arc::clone(&store),
            Arc::new(config.cache.registry.clone()),
            Arc::new(sources),
        );
        info!(
            rules = config.pipeline.rules.len(),
            indexes = config.cache.registry.entries.len(),
            "gateway ready"
        );

        Self {
            pipeline,
            resolver,
            rebuilder,
            store,
        }
    }

    /// Runs one request through the pipeline and `handler`.
    pub async fn handle<H>(&self, ctx: MiddlewareContext, request: Request, handler: H) -> Response
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'static,
    {
        self.pipeline.process(ctx, request, handler).await
    }

    /// Rebuilds the cache keys selected by `key_pattern`.
    ///
    /// # Errors
    ///
    /// See [`CacheRebuilder::rebuild`].
    pub async fn rebuild(
        &self,
        key_pattern: &str,
        sub_keys: &[String],
    ) -> Result<RebuildReport, CacheError> {
        self.rebuilder.rebuild(key_pattern, sub_keys).await
    }

    /// Returns the pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Returns the secret resolver.
    #[must_use]
    pub fn resolver(&self) -> &Arc<SecretResolver> {
        &self.resolver
    }

    /// Returns the cache rebuilder.
    #[must_use]
    pub fn rebuilder(&self) -> &CacheRebuilder {
        &self.rebuilder
    }

    /// Returns the shared cache store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }
}

/// Opens the store named by the `store` section.
///
/// # Errors
///
/// Returns `StoreError::Backend` if Redis has no URL or cannot be reached.
pub async fn connect_store(config: &StoreConfig) -> StoreResult<Arc<dyn CacheStore>> {
    match config.kind {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreKind::Redis => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| StoreError::backend("redis store requires a url"))?;
            Ok(Arc::new(RedisStore::connect(url).await?))
        }
    }
}

/// Installs logging and, when enabled, the metrics exporter.
///
/// # Errors
///
/// Returns the telemetry error if either cannot be installed.
pub fn init_telemetry(config: &PortcullisConfig) -> TelemetryResult<()> {
    portcullis_telemetry::init_logging(&config.logging.to_log_config())?;
    portcullis_telemetry::init_metrics(&config.metrics.to_metrics_config())
}
