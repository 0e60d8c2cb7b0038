//! Backend capabilities consumed by the cache layer.
//!
//! The wire protocol client that actually talks to the registry lives
//! outside this crate. It plugs in through two traits:
//!
//! - [`RegistryBackend`] - one live connection exposing the raw registry
//!   operations
//! - [`ConnectionFactory`] - builds a backend from [`ConnectionSettings`],
//!   called again whenever the bearer token changes
//!
//! [`memory`] provides an in-process implementation of both.

pub mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{RegistryError, RegistryResult};
use crate::types::{SchemaDocument, SchemaId, SchemaRecord, SchemaVersion};

/// How a backend deletes schema versions.
///
/// Resolved once when a connection is built, not queried per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteCapability {
    /// The backend can delete a single version
    #[default]
    Version,
    /// The backend can only delete a whole subject
    SubjectOnly,
}

/// Raw registry operations of one live connection.
///
/// Lookups return `Ok(None)` when the subject, version or id does not exist;
/// `Err` is reserved for transport and backend failures.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    async fn fetch_by_subject_version(
        &self,
        subject: &str,
        version: SchemaVersion,
    ) -> RegistryResult<Option<SchemaRecord>>;

    async fn fetch_by_id(&self, id: SchemaId) -> RegistryResult<Option<SchemaRecord>>;

    /// Register `document` under `subject`, returning the assigned id.
    async fn register(&self, subject: &str, document: &SchemaDocument) -> RegistryResult<SchemaId>;

    async fn delete_version(&self, subject: &str, version: SchemaVersion) -> RegistryResult<()>;

    /// Delete every version of `subject`.
    ///
    /// Only called when [`delete_capability`](Self::delete_capability)
    /// reports [`DeleteCapability::SubjectOnly`].
    async fn delete_subject(&self, subject: &str) -> RegistryResult<()> {
        Err(RegistryError::Unsupported(format!(
            "delete subject {subject}"
        )))
    }

    fn delete_capability(&self) -> DeleteCapability {
        DeleteCapability::Version
    }

    /// Release the connection. Called once, after it stopped being current.
    async fn close(&self) {}
}

/// Everything needed to open one backend connection.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub url: String,
    pub bearer_token: Option<String>,
    /// Forwarded verbatim (logical cluster, identity pool, ...)
    pub properties: BTreeMap<String, String>,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("url", &self.url)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("properties", &self.properties)
            .finish()
    }
}

/// Builds backend connections.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, settings: &ConnectionSettings) -> RegistryResult<DynBackend>;
}

/// Shared backend handle.
pub type DynBackend = Arc<dyn RegistryBackend>;
