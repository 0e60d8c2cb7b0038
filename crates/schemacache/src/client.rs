//! Schema registry client: connection lifecycle plus the public operations.
//!
//! The client owns the shared [`SchemaCache`], an optional [`TokenManager`]
//! and the current connection binding (backend, bearer token and the
//! [`CachingRegistrar`] wrapping that backend).
//!
//! # Connection lifecycle
//!
//! - Without a token manager the connection is built lazily once and reused.
//! - With a token manager every operation fetches the token first, outside
//!   any lock. A matching bound token is served lock-free; a different one
//!   rebuilds the connection under the rebuild lock, swaps the new binding
//!   in and only then closes the previous backend.
//! - When no usable token can be obtained, a connection bound to an earlier
//!   token keeps serving. Without one the call fails with
//!   [`RegistryError::TokenUnavailable`].
//!
//! All bindings share the same cache, so a rebuild keeps cached lookups.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{ConnectionFactory, ConnectionSettings, DynBackend};
use crate::cache::{CacheStats, SchemaCache};
use crate::config::ClientConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::metrics::{MetricsCollector, RecorderMetrics};
use crate::registrar::{CachingRegistrar, require_subject};
use crate::subject::{SubjectNameStrategy, legacy_subject_name};
use crate::token::{TokenManager, TokenProvider};
use crate::types::{SchemaDocument, SchemaFormat, SchemaId, SchemaRole, SchemaVersion};
use crate::wire;

/// The current connection and the registrar bound to it.
struct ConnectionBinding {
    token: Option<String>,
    backend: DynBackend,
    registrar: Arc<CachingRegistrar>,
}

/// Builder for [`SchemaRegistryClient`].
pub struct SchemaRegistryClientBuilder {
    config: ClientConfig,
    factory: Option<Arc<dyn ConnectionFactory>>,
    token_manager: Option<Arc<TokenManager>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
    subject_strategy: Option<Arc<dyn SubjectNameStrategy>>,
}

impl SchemaRegistryClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            factory: None,
            token_manager: None,
            token_provider: None,
            metrics: None,
            subject_strategy: None,
        }
    }

    #[must_use]
    pub fn with_connection_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Use an existing token manager. Takes precedence over
    /// [`with_token_provider`](Self::with_token_provider).
    #[must_use]
    pub fn with_token_manager(mut self, manager: Arc<TokenManager>) -> Self {
        self.token_manager = Some(manager);
        self
    }

    /// Refresh bearer tokens through `provider`.
    #[must_use]
    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Override the configured subject naming strategy.
    #[must_use]
    pub fn with_subject_strategy(mut self, strategy: Arc<dyn SubjectNameStrategy>) -> Self {
        self.subject_strategy = Some(strategy);
        self
    }

    pub fn build(self) -> RegistryResult<SchemaRegistryClient> {
        self.config.validate()?;
        let factory = self
            .factory
            .ok_or_else(|| RegistryError::Config("a connection factory is required".to_string()))?;
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(RecorderMetrics));

        let token_manager = match (self.token_manager, self.token_provider) {
            (Some(manager), _) => Some(manager),
            (None, Some(provider)) => {
                Some(Arc::new(TokenManager::new(provider).with_metrics(metrics.clone())))
            }
            (None, None) => None,
        };

        let cache = Arc::new(SchemaCache::from_config(&self.config.cache).with_metrics(metrics));

        Ok(SchemaRegistryClient {
            config: self.config,
            cache,
            factory,
            token_manager,
            subject_strategy: self.subject_strategy,
            binding: ArcSwapOption::empty(),
            rebuild_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }
}

/// Caching schema registry client.
///
/// Meant to live for the whole process; share it behind an `Arc` and call
/// [`shutdown`](Self::shutdown) once at the end.
pub struct SchemaRegistryClient {
    config: ClientConfig,
    cache: Arc<SchemaCache>,
    factory: Arc<dyn ConnectionFactory>,
    token_manager: Option<Arc<TokenManager>>,
    subject_strategy: Option<Arc<dyn SubjectNameStrategy>>,
    binding: ArcSwapOption<ConnectionBinding>,
    rebuild_lock: Mutex<()>,
    closed: AtomicBool,
}

impl std::fmt::Debug for SchemaRegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistryClient")
            .field("url", &self.config.url)
            .field("connected", &self.binding.load().is_some())
            .field("token_manager", &self.token_manager.is_some())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("cache", &self.cache)
            .finish()
    }
}

impl SchemaRegistryClient {
    pub fn builder(config: ClientConfig) -> SchemaRegistryClientBuilder {
        SchemaRegistryClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<SchemaCache> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn token_manager(&self) -> Option<&Arc<TokenManager>> {
        self.token_manager.as_ref()
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Registrar of the current connection, building or rebuilding the
    /// connection as the bearer token requires.
    pub async fn connection(&self) -> RegistryResult<Arc<CachingRegistrar>> {
        self.ensure_open()?;

        let Some(tokens) = &self.token_manager else {
            if let Some(binding) = self.binding.load_full() {
                return Ok(binding.registrar.clone());
            }
            return self.rebind(None).await;
        };

        let token = match tokens.get_token().await {
            Ok(token) if !token.trim().is_empty() => token,
            Ok(_) => return self.stale_or_unavailable("token provider returned an empty token"),
            Err(RegistryError::UseAfterShutdown) => return Err(RegistryError::UseAfterShutdown),
            Err(err) => return self.stale_or_unavailable(&err.to_string()),
        };

        if let Some(binding) = self.binding.load_full() {
            if binding.token.as_deref() == Some(token.as_str()) {
                return Ok(binding.registrar.clone());
            }
        }

        self.rebind(Some(token)).await
    }

    async fn rebind(&self, token: Option<String>) -> RegistryResult<Arc<CachingRegistrar>> {
        let _guard = self.rebuild_lock.lock().await;
        self.ensure_open()?;

        // A racing caller may already have bound this token
        if let Some(current) = self.binding.load_full() {
            if current.token == token {
                return Ok(current.registrar.clone());
            }
        }

        let settings = ConnectionSettings {
            url: self.config.url.clone(),
            bearer_token: token.clone(),
            properties: self.config.connection_properties(),
        };
        let backend = self.factory.connect(&settings).await?;
        let registrar = Arc::new(CachingRegistrar::new(backend.clone(), self.cache.clone()));

        let previous = self.binding.swap(Some(Arc::new(ConnectionBinding {
            token,
            backend,
            registrar: registrar.clone(),
        })));

        match previous {
            Some(previous) => {
                info!(url = %self.config.url, "Registry connection rebuilt for new bearer token");
                previous.backend.close().await;
            }
            None => info!(url = %self.config.url, "Registry connection established"),
        }

        Ok(registrar)
    }

    fn stale_or_unavailable(&self, reason: &str) -> RegistryResult<Arc<CachingRegistrar>> {
        match self.binding.load_full() {
            Some(binding) if binding.token.as_deref().is_some_and(|t| !t.is_empty()) => {
                warn!(reason, "Bearer token unavailable, using existing connection");
                Ok(binding.registrar.clone())
            }
            _ => Err(RegistryError::TokenUnavailable(reason.to_string())),
        }
    }

    /// Schema text of `version` under `subject`, or `None` if it does not exist.
    pub async fn get_schema_by_subject_version(
        &self,
        subject: &str,
        version: SchemaVersion,
    ) -> RegistryResult<Option<String>> {
        require_subject(subject)?;
        let registrar = self.connection().await?;
        let record = registrar.get_by_subject_version(subject, version).await?;
        Ok(record.map(|r| r.schema.clone()))
    }

    /// Schema text registered under `id`, or `None` if it does not exist.
    pub async fn get_schema_by_id(&self, id: SchemaId) -> RegistryResult<Option<String>> {
        let registrar = self.connection().await?;
        let record = registrar.get_by_id(id).await?;
        Ok(record.map(|r| r.schema.clone()))
    }

    /// Schema text of the id framed in `message`.
    ///
    /// A malformed header yields `None` without touching the cache or the
    /// registry.
    pub async fn get_schema_from_wire_message(&self, message: &[u8]) -> RegistryResult<Option<String>> {
        self.ensure_open()?;
        let Some(id) = wire::decode_schema_id(message) else {
            debug!(len = message.len(), "Message does not carry a schema id");
            return Ok(None);
        };
        self.get_schema_by_id(id).await
    }

    /// Register `schema` under the subject derived from `topic`.
    pub async fn register_schema(
        &self,
        topic: &str,
        schema: &str,
        format: SchemaFormat,
        role: Option<SchemaRole>,
        record_type: Option<&str>,
    ) -> RegistryResult<SchemaId> {
        self.ensure_open()?;
        if schema.trim().is_empty() {
            return Err(RegistryError::invalid("schema cannot be empty"));
        }
        let subject = self.subject_name(topic, role, record_type)?;
        let document = SchemaDocument::new(schema, format).with_role(role);

        let registrar = self.connection().await?;
        registrar.register(&subject, &document).await
    }

    /// Register the key schema of `topic`. `record_type` feeds record-based naming strategies.
    pub async fn register_key_schema(
        &self,
        topic: &str,
        schema: &str,
        format: SchemaFormat,
        record_type: Option<&str>,
    ) -> RegistryResult<SchemaId> {
        self.register_schema(topic, schema, format, Some(SchemaRole::Key), record_type)
            .await
    }

    /// Register the value schema of `topic`. `record_type` feeds record-based naming strategies.
    pub async fn register_value_schema(
        &self,
        topic: &str,
        schema: &str,
        format: SchemaFormat,
        record_type: Option<&str>,
    ) -> RegistryResult<SchemaId> {
        self.register_schema(topic, schema, format, Some(SchemaRole::Value), record_type)
            .await
    }

    pub async fn delete_schema_version(&self, subject: &str, version: SchemaVersion) -> RegistryResult<()> {
        require_subject(subject)?;
        let registrar = self.connection().await?;
        registrar.delete_version(subject, version).await
    }

    /// Subject for `topic`: the custom strategy if one was supplied, else
    /// the configured kind, else the legacy rule.
    pub fn subject_name(
        &self,
        topic: &str,
        role: Option<SchemaRole>,
        record_type: Option<&str>,
    ) -> RegistryResult<String> {
        if topic.trim().is_empty() {
            return Err(RegistryError::invalid("topic cannot be empty"));
        }

        let subject = if let Some(strategy) = &self.subject_strategy {
            strategy.subject_name(topic, role, record_type)
        } else if let Some(kind) = self.config.subject_name_strategy {
            kind.subject_name(topic, role, record_type)
        } else {
            legacy_subject_name(topic, role, record_type)
        };
        Ok(subject)
    }

    /// Release the connection, the cache and the token manager, in that
    /// order. Later calls fail with [`RegistryError::UseAfterShutdown`].
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _guard = self.rebuild_lock.lock().await;
        if let Some(binding) = self.binding.swap(None) {
            binding.backend.close().await;
        }
        self.cache.clear();
        if let Some(tokens) = &self.token_manager {
            tokens.shutdown();
        }
        info!(url = %self.config.url, "Schema registry client shut down");
    }

    fn ensure_open(&self) -> RegistryResult<()> {
        if self.is_shutdown() {
            return Err(RegistryError::UseAfterShutdown);
        }
        Ok(())
    }
}
