//! Client configuration

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};
use crate::subject::SubjectNameStrategyKind;

/// Connection property carrying the logical cluster id.
pub const LOGICAL_CLUSTER_PROPERTY: &str = "bearer.auth.logical.cluster";

/// Connection property carrying the identity pool id.
pub const IDENTITY_POOL_PROPERTY: &str = "bearer.auth.identity.pool.id";

/// Configuration for the schema registry client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Registry endpoint, forwarded verbatim to the connection factory
    #[serde(default)]
    pub url: String,

    /// Lookup cache sizing
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logical cluster identifier used with bearer authentication
    #[serde(default)]
    pub logical_cluster: Option<String>,

    /// Identity pool identifier used with bearer authentication
    #[serde(default)]
    pub identity_pool_id: Option<String>,

    /// Subject naming rule; `None` keeps the legacy topic/record behaviour
    #[serde(default)]
    pub subject_name_strategy: Option<SubjectNameStrategyKind>,

    /// Extra connection properties, forwarded verbatim
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Cache sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached entries
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Entry time-to-live in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_max_size() -> usize {
    1_000
}

fn default_ttl_secs() -> u64 {
    1_800
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> RegistryResult<Self> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> RegistryResult<()> {
        if self.cache.max_size == 0 {
            return Err(RegistryError::Config(
                "cache.max_size must be greater than zero".to_string(),
            ));
        }
        if self.cache.ttl_secs == 0 {
            return Err(RegistryError::Config(
                "cache.ttl_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Connection properties: the explicit `properties` table plus the
    /// logical cluster and identity pool ids when set.
    pub fn connection_properties(&self) -> BTreeMap<String, String> {
        let mut properties = self.properties.clone();
        if let Some(cluster) = self.logical_cluster.as_deref().filter(|c| !c.trim().is_empty()) {
            properties.insert(LOGICAL_CLUSTER_PROPERTY.to_string(), cluster.to_string());
        }
        if let Some(pool) = self.identity_pool_id.as_deref().filter(|p| !p.trim().is_empty()) {
            properties.insert(IDENTITY_POOL_PROPERTY.to_string(), pool.to_string());
        }
        properties
    }
}
