use std::sync::Arc;

use anyhow::{Context, Result};
use schemacache::backend::memory::{MemoryConnectionFactory, MemoryRegistry};
use schemacache::{ClientConfig, SchemaRegistryClient};

use crate::cli::SubjectArgs;
use crate::output::print_field;

pub fn run(mut config: ClientConfig, args: &SubjectArgs) -> Result<()> {
    if let Some(strategy) = args.strategy {
        config.subject_name_strategy = Some(strategy.into());
    }

    let strategy = config
        .subject_name_strategy
        .map_or_else(|| "legacy".to_string(), |kind| kind.to_string());

    // Subject naming never connects, any factory will do
    let factory = Arc::new(MemoryConnectionFactory::new(Arc::new(MemoryRegistry::new())));
    let client = SchemaRegistryClient::builder(config)
        .with_connection_factory(factory)
        .build()
        .context("invalid client configuration")?;

    let subject = client.subject_name(
        &args.topic,
        args.role.map(Into::into),
        args.record_type.as_deref(),
    )?;

    print_field("Strategy", strategy);
    print_field("Subject", subject);
    Ok(())
}
