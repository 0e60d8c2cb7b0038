//! End-to-end behaviour of the client against the in-memory registry

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusRecorder};
use schemacache::backend::memory::{MemoryConnectionFactory, MemoryRegistry};
use schemacache::config::{IDENTITY_POOL_PROPERTY, LOGICAL_CLUSTER_PROPERTY};
use schemacache::wire::encode_header;
use schemacache::{
    ClientConfig, IssuedToken, RegistryError, RegistryResult, SchemaDocument,
    SchemaFormat, SchemaRegistryClient, TokenProvider,
};

const ORDER_SCHEMA: &str = r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"long"}]}"#;

/// Token source controlled by the test.
struct ControlledTokens {
    current: Mutex<String>,
    lifetime: time::Duration,
    failing: AtomicBool,
}

impl ControlledTokens {
    fn new(token: &str, lifetime: time::Duration) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(token.to_string()),
            lifetime,
            failing: AtomicBool::new(false),
        })
    }

    fn rotate(&self, token: &str) {
        *self.current.lock().unwrap() = token.to_string();
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl TokenProvider for ControlledTokens {
    async fn fetch_token(&self) -> RegistryResult<IssuedToken> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RegistryError::backend("identity provider unreachable"));
        }
        let token = self.current.lock().unwrap().clone();
        Ok(IssuedToken::expiring_in(token, self.lifetime))
    }
}

/// Value of `name` as rendered by `recorder`; zero if never incremented.
fn rendered_counter(recorder: &PrometheusRecorder, name: &str) -> u64 {
    let exported = name.replace('.', "_");
    recorder
        .handle()
        .render()
        .lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let (metric, value) = line.split_once(' ')?;
            (metric == exported || metric == format!("{exported}_total"))
                .then(|| value.trim().parse().ok())
                .flatten()
        })
        .unwrap_or(0)
}

struct Harness {
    registry: Arc<MemoryRegistry>,
    factory: Arc<MemoryConnectionFactory>,
    client: SchemaRegistryClient,
}

fn harness(registry: MemoryRegistry, tokens: Option<Arc<ControlledTokens>>) -> Harness {
    let mut config = ClientConfig::new("mem://registry");
    config.cache.ttl_secs = 60;
    config.cache.max_size = 1000;
    harness_with_config(registry, tokens, config)
}

fn harness_with_config(
    registry: MemoryRegistry,
    tokens: Option<Arc<ControlledTokens>>,
    config: ClientConfig,
) -> Harness {
    let registry = Arc::new(registry);
    let factory = Arc::new(MemoryConnectionFactory::new(registry.clone()));
    let mut builder = SchemaRegistryClient::builder(config).with_connection_factory(factory.clone());
    if let Some(tokens) = tokens {
        builder = builder.with_token_provider(tokens);
    }
    Harness {
        registry,
        factory,
        client: builder.build().unwrap(),
    }
}

#[tokio::test]
async fn test_repeated_lookup_served_from_cache() {
    let h = harness(MemoryRegistry::new(), None);
    h.registry
        .put_version("orders-value", 1, &SchemaDocument::avro(ORDER_SCHEMA));

    let first = h.client.get_schema_by_subject_version("orders-value", 1).await.unwrap();
    let second = h.client.get_schema_by_subject_version("orders-value", 1).await.unwrap();

    assert_eq!(first.as_deref(), Some(ORDER_SCHEMA));
    assert_eq!(first, second);
    assert_eq!(h.registry.fetch_by_subject_version_calls(), 1);

    let stats = h.client.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_register_populates_only_latest_and_id() {
    let h = harness(MemoryRegistry::new(), None);
    let schema = r#"{"type":"string"}"#;

    let id = h
        .client
        .register_schema("orders", schema, SchemaFormat::Avro, None, None)
        .await
        .unwrap();

    // Served from the id alias written by the registration
    assert_eq!(h.client.get_schema_by_id(id).await.unwrap().as_deref(), Some(schema));
    assert_eq!(h.registry.fetch_by_id_calls(), 0);
    assert!(h.client.cache().peek("orders:latest").is_some());

    // The version key was not populated, so this goes upstream once
    let by_version = h.client.get_schema_by_subject_version("orders", 1).await.unwrap();
    assert_eq!(by_version.as_deref(), Some(schema));
    assert_eq!(h.registry.fetch_by_subject_version_calls(), 1);
}

#[tokio::test]
async fn test_register_invalidates_subject_entries() {
    let h = harness(MemoryRegistry::new(), None);
    h.registry.put_version("orders", 1, &SchemaDocument::avro(ORDER_SCHEMA));
    h.client.get_schema_by_subject_version("orders", 1).await.unwrap();
    h.client.get_schema_by_subject_version("orders", 7).await.unwrap();
    assert!(h.client.cache().peek("orders:1").is_some());
    assert!(h.client.cache().peek("orders:7").is_some());

    h.client
        .register_schema("orders", r#""string""#, SchemaFormat::Avro, None, None)
        .await
        .unwrap();

    assert!(h.client.cache().peek("orders:1").is_none());
    assert!(h.client.cache().peek("orders:7").is_none());
    assert!(h.client.cache().peek("orders:latest").is_some());
}

#[tokio::test]
async fn test_bad_wire_message_touches_nothing() {
    let h = harness(MemoryRegistry::new(), None);

    let result = h
        .client
        .get_schema_from_wire_message(&[1, 0, 0, 0, 5, 0xca, 0xfe])
        .await
        .unwrap();
    assert!(result.is_none());
    assert!(h.client.get_schema_from_wire_message(&[0, 0, 0]).await.unwrap().is_none());
    assert!(h.client.get_schema_from_wire_message(&[0, 0, 0, 0, 0]).await.unwrap().is_none());

    let stats = h.client.cache_stats();
    assert_eq!(stats.hits + stats.misses, 0);
    assert_eq!(h.registry.fetch_by_id_calls(), 0);
    assert_eq!(h.factory.connect_count(), 0);
}

#[tokio::test]
async fn test_wire_message_resolves_schema() {
    let h = harness(MemoryRegistry::new(), None);
    let id = h
        .registry
        .put_version("orders-value", 1, &SchemaDocument::avro(ORDER_SCHEMA));

    let message = encode_header(id, b"\x02\x04");
    let schema = h.client.get_schema_from_wire_message(&message).await.unwrap();

    assert_eq!(schema.as_deref(), Some(ORDER_SCHEMA));
    assert_eq!(h.registry.fetch_by_id_calls(), 1);
}

#[tokio::test]
async fn test_delete_then_read_refetches() {
    let h = harness(MemoryRegistry::new(), None);
    h.registry.put_version("orders", 1, &SchemaDocument::avro(r#""first""#));

    let before = h.client.get_schema_by_subject_version("orders", 1).await.unwrap();
    assert_eq!(before.as_deref(), Some(r#""first""#));

    h.client.delete_schema_version("orders", 1).await.unwrap();
    assert!(h.client.cache().peek("orders:1").is_none());
    assert!(h.client.cache().peek("orders:latest").is_none());

    h.registry.put_version("orders", 1, &SchemaDocument::avro(r#""second""#));
    let after = h.client.get_schema_by_subject_version("orders", 1).await.unwrap();

    assert_eq!(after.as_deref(), Some(r#""second""#));
    assert_eq!(h.registry.fetch_by_subject_version_calls(), 2);
}

#[tokio::test]
async fn test_missing_schema_is_negatively_cached() {
    let h = harness(MemoryRegistry::new(), None);

    assert!(h.client.get_schema_by_subject_version("ghost", 1).await.unwrap().is_none());
    assert!(h.client.get_schema_by_subject_version("ghost", 1).await.unwrap().is_none());
    assert!(h.client.get_schema_by_id(404).await.unwrap().is_none());
    assert!(h.client.get_schema_by_id(404).await.unwrap().is_none());

    assert_eq!(h.registry.fetch_by_subject_version_calls(), 1);
    assert_eq!(h.registry.fetch_by_id_calls(), 1);
    assert_eq!(h.client.cache_stats().hits, 2);
}

#[tokio::test]
async fn test_backend_failure_is_not_cached() {
    let h = harness(MemoryRegistry::new(), None);
    h.registry
        .put_version("orders-value", 1, &SchemaDocument::avro(ORDER_SCHEMA));

    h.registry.set_failing(true);
    let err = h
        .client
        .get_schema_by_subject_version("orders-value", 1)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::TransientBackend(_)));
    assert!(h.client.cache().is_empty());

    h.registry.set_failing(false);
    let schema = h.client.get_schema_by_subject_version("orders-value", 1).await.unwrap();
    assert_eq!(schema.as_deref(), Some(ORDER_SCHEMA));
    assert_eq!(h.registry.fetch_by_subject_version_calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_share_one_fetch_and_one_connection() {
    let h = harness(
        MemoryRegistry::new().with_latency(Duration::from_millis(50)),
        Some(ControlledTokens::new("token-a", time::Duration::hours(1))),
    );
    h.registry
        .put_version("orders-value", 3, &SchemaDocument::avro(ORDER_SCHEMA));
    let client = Arc::new(h.client);

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.get_schema_by_subject_version("orders-value", 3).await })
        })
        .collect();

    for handle in handles {
        let schema = handle.await.unwrap().unwrap();
        assert_eq!(schema.as_deref(), Some(ORDER_SCHEMA));
    }

    assert_eq!(h.registry.fetch_by_subject_version_calls(), 1);
    assert_eq!(h.factory.connect_count(), 1);
}

#[tokio::test]
async fn test_token_rotation_rebuilds_connection() {
    let tokens = ControlledTokens::new("token-a", time::Duration::hours(1));
    let h = harness(MemoryRegistry::new(), Some(tokens.clone()));
    h.registry
        .put_version("orders-value", 1, &SchemaDocument::avro(ORDER_SCHEMA));

    h.client.get_schema_by_subject_version("orders-value", 1).await.unwrap();
    assert_eq!(h.factory.connect_count(), 1);

    tokens.rotate("token-b");
    let manager = h.client.token_manager().unwrap();
    assert_eq!(manager.force_refresh().await.unwrap(), "token-b");

    let schema = h.client.get_schema_by_subject_version("orders-value", 1).await.unwrap();
    assert_eq!(schema.as_deref(), Some(ORDER_SCHEMA));

    let connections = h.factory.connections();
    assert_eq!(connections.len(), 2);
    assert_eq!(connections[0].token(), Some("token-a"));
    assert!(connections[0].is_closed());
    assert_eq!(connections[1].token(), Some("token-b"));
    assert!(!connections[1].is_closed());

    // The cache outlives the connection
    assert_eq!(h.registry.fetch_by_subject_version_calls(), 1);
}

#[tokio::test]
async fn test_unchanged_token_keeps_connection() {
    // 30s lifetime sits inside the refresh margin, so every call refreshes
    let tokens = ControlledTokens::new("token-a", time::Duration::seconds(30));
    let h = harness(MemoryRegistry::new(), Some(tokens));

    h.client.get_schema_by_id(1).await.unwrap();
    h.client.get_schema_by_id(2).await.unwrap();
    h.client.get_schema_by_id(3).await.unwrap();

    assert_eq!(h.factory.connect_count(), 1);
}

#[tokio::test]
async fn test_refresh_failure_falls_back_to_stale_connection() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let _guard = metrics::set_default_local_recorder(&recorder);
    let tokens = ControlledTokens::new("token-a", time::Duration::seconds(30));
    let registry = Arc::new(MemoryRegistry::new());
    registry.put_version("orders-value", 1, &SchemaDocument::avro(ORDER_SCHEMA));
    let factory = Arc::new(MemoryConnectionFactory::new(registry.clone()));
    let client = SchemaRegistryClient::builder(ClientConfig::new("mem://registry"))
        .with_connection_factory(factory.clone())
        .with_token_provider(tokens.clone())
        .build()
        .unwrap();

    client.get_schema_by_id(1).await.unwrap();
    tokens.set_failing(true);

    let schema = client.get_schema_by_subject_version("orders-value", 1).await.unwrap();

    assert_eq!(schema.as_deref(), Some(ORDER_SCHEMA));
    assert_eq!(factory.connect_count(), 1);
    assert_eq!(factory.connections()[0].token(), Some("token-a"));
    assert_eq!(rendered_counter(&recorder, schemacache::metrics::TOKEN_REFRESH), 1);
    assert_eq!(rendered_counter(&recorder, schemacache::metrics::CACHE_SET), 3);
}

#[tokio::test]
async fn test_no_token_and_no_connection_fails_fast() {
    let tokens = ControlledTokens::new("token-a", time::Duration::hours(1));
    tokens.set_failing(true);
    let h = harness(MemoryRegistry::new(), Some(tokens));

    let err = h
        .client
        .get_schema_by_subject_version("orders-value", 1)
        .await
        .unwrap_err();

    assert!(matches!(err, RegistryError::TokenUnavailable(_)));
    assert_eq!(h.factory.connect_count(), 0);
    assert_eq!(h.registry.fetch_by_subject_version_calls(), 0);
}

#[tokio::test]
async fn test_empty_token_counts_as_unavailable() {
    let tokens = ControlledTokens::new("", time::Duration::hours(1));
    let h = harness(MemoryRegistry::new(), Some(tokens));

    let err = h.client.get_schema_by_id(1).await.unwrap_err();

    assert!(matches!(err, RegistryError::TokenUnavailable(_)));
    assert_eq!(h.factory.connect_count(), 0);
}

#[tokio::test]
async fn test_connection_failure_is_retried_on_next_call() {
    let h = harness(MemoryRegistry::new(), None);

    h.factory.set_failing(true);
    assert!(matches!(
        h.client.get_schema_by_id(1).await,
        Err(RegistryError::TransientBackend(_))
    ));

    h.factory.set_failing(false);
    assert!(h.client.get_schema_by_id(1).await.unwrap().is_none());
    assert_eq!(h.factory.connect_count(), 1);
}

#[tokio::test]
async fn test_connection_settings_forwarded() {
    let mut config = ClientConfig::new("https://registry.example.com");
    config.logical_cluster = Some("lsrc-42".to_string());
    config.identity_pool_id = Some("pool-7".to_string());
    config
        .properties
        .insert("request.timeout.ms".to_string(), "5000".to_string());
    let tokens = ControlledTokens::new("token-a", time::Duration::hours(1));
    let h = harness_with_config(MemoryRegistry::new(), Some(tokens), config);

    h.client.connection().await.unwrap();

    let settings = &h.factory.settings()[0];
    assert_eq!(settings.url, "https://registry.example.com");
    assert_eq!(settings.bearer_token.as_deref(), Some("token-a"));
    assert_eq!(
        settings.properties.get(LOGICAL_CLUSTER_PROPERTY).map(String::as_str),
        Some("lsrc-42")
    );
    assert_eq!(
        settings.properties.get(IDENTITY_POOL_PROPERTY).map(String::as_str),
        Some("pool-7")
    );
    assert_eq!(
        settings.properties.get("request.timeout.ms").map(String::as_str),
        Some("5000")
    );
}

#[tokio::test]
async fn test_operations_fail_after_shutdown() {
    let tokens = ControlledTokens::new("token-a", time::Duration::hours(1));
    let h = harness(MemoryRegistry::new(), Some(tokens));
    h.client.get_schema_by_id(1).await.unwrap();

    h.client.shutdown().await;

    assert!(h.factory.connections()[0].is_closed());
    assert!(h.client.token_manager().unwrap().is_shutdown());
    assert_eq!(
        h.client.get_schema_by_subject_version("orders", 1).await,
        Err(RegistryError::UseAfterShutdown)
    );
    assert_eq!(
        h.client
            .register_value_schema("orders", ORDER_SCHEMA, SchemaFormat::Avro, None)
            .await,
        Err(RegistryError::UseAfterShutdown)
    );
    assert_eq!(
        h.client.delete_schema_version("orders", 1).await,
        Err(RegistryError::UseAfterShutdown)
    );
    assert!(matches!(
        h.client.connection().await,
        Err(RegistryError::UseAfterShutdown)
    ));
}
