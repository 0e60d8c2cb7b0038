//! Heartbeat loop against an in-memory registry.
//!
//! Tokens are issued with a short lifetime, so the loop shows connection
//! rebuilds on rotation while lookups keep being served from the cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use schemacache::backend::memory::{MemoryConnectionFactory, MemoryRegistry};
use schemacache::wire::encode_header;
use metrics_exporter_prometheus::PrometheusBuilder;
use schemacache::{
    ClientConfig, IssuedToken, RecorderMetrics, RegistryError, SchemaFormat, SchemaRegistryClient,
    SchemaRole, TokenManager, describe_metrics,
};
use tracing::info;

use crate::cli::DemoArgs;
use crate::output::{print_field, print_success, print_table};

const DEMO_SCHEMA: &str = r#"{"type":"record","name":"Order","namespace":"com.acme","fields":[{"name":"id","type":"long"},{"name":"amount","type":"double"}]}"#;

pub async fn run(config: ClientConfig, args: &DemoArgs) -> Result<()> {
    let registry = Arc::new(MemoryRegistry::new());
    let factory = Arc::new(MemoryConnectionFactory::new(registry.clone()));
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;
    describe_metrics();
    let metrics = Arc::new(RecorderMetrics);

    let lifetime = time::Duration::seconds(i64::try_from(args.token_lifetime_secs).unwrap_or(i64::MAX));
    let issued = Arc::new(AtomicUsize::new(0));
    let counter = issued.clone();
    let provider = move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move { Ok::<_, RegistryError>(IssuedToken::expiring_in(format!("demo-token-{n}"), lifetime)) }
    };
    // Rotate exactly at expiry so short lifetimes are visible
    let tokens = Arc::new(
        TokenManager::new(Arc::new(provider))
            .with_refresh_margin(time::Duration::ZERO)
            .with_metrics(metrics.clone()),
    );

    let client = SchemaRegistryClient::builder(config)
        .with_connection_factory(factory.clone())
        .with_token_manager(tokens.clone())
        .with_metrics(metrics.clone())
        .build()
        .context("invalid client configuration")?;

    let subject = client.subject_name(&args.topic, Some(SchemaRole::Value), None)?;
    let id = client
        .register_value_schema(&args.topic, DEMO_SCHEMA, SchemaFormat::Avro, None)
        .await
        .context("failed to register demo schema")?;
    print_success(&format!("Registered {subject} as schema id {id}"));

    let message = encode_header(id, b"\x02\x0a");
    let mut rows = Vec::with_capacity(args.rounds as usize);

    for round in 1..=args.rounds {
        let by_version = client.get_schema_by_subject_version(&subject, 1).await?;
        let from_wire = client.get_schema_from_wire_message(&message).await?;
        let purged = client.cache().purge_expired();

        let stats = client.cache_stats();
        let upstream = registry.fetch_by_subject_version_calls() + registry.fetch_by_id_calls();
        info!(round, upstream, connections = factory.connect_count(), "Heartbeat round complete");

        rows.push(vec![
            round.to_string(),
            tokens.current_token().unwrap_or_else(|| "-".to_string()),
            factory.connect_count().to_string(),
            upstream.to_string(),
            stats.size.to_string(),
            purged.to_string(),
            format!("{:.1}%", stats.hit_rate()),
            (by_version.is_some() && from_wire.is_some()).to_string(),
        ]);

        if round < args.rounds {
            tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
        }
    }

    print_table(
        &[
            "Round",
            "Token",
            "Connections",
            "Upstream fetches",
            "Cached",
            "Purged",
            "Hit rate",
            "Resolved",
        ],
        &rows,
    );

    print_field("tokens issued", issued.load(Ordering::SeqCst));
    println!();
    print!("{}", prometheus.render());

    client.shutdown().await;
    Ok(())
}
