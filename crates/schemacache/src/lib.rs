//! Caching and connection lifecycle layer for a schema registry
//!
//! This crate sits between producers/consumers and a schema registry,
//! including:
//! - A bounded TTL cache with positive and negative entries
//! - Request coalescing so concurrent lookups for one key hit the registry once
//! - Bearer token refresh ahead of expiry
//! - Connection rebuilds on token rotation, with stale-connection fallback
//!
//! The registry wire client itself is pluggable through
//! [`backend::RegistryBackend`] and [`backend::ConnectionFactory`].

pub mod backend;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod registrar;
pub mod subject;
pub mod token;
pub mod types;
pub mod wire;

pub use backend::{ConnectionFactory, ConnectionSettings, DeleteCapability, RegistryBackend};
pub use cache::{CacheEvent, CacheStats, CacheValue, SchemaCache};
pub use client::{SchemaRegistryClient, SchemaRegistryClientBuilder};
pub use config::{CacheConfig, ClientConfig};
pub use error::{RegistryError, RegistryResult};
pub use crate::metrics::{MetricsCollector, NoopMetrics, RecorderMetrics, describe_metrics};
pub use registrar::CachingRegistrar;
pub use subject::{SubjectNameStrategy, SubjectNameStrategyKind};
pub use token::{IssuedToken, TokenEvent, TokenManager, TokenProvider};
pub use types::{SchemaDocument, SchemaFormat, SchemaId, SchemaRecord, SchemaRole, SchemaVersion};
