//! Error types for the schema registry cache layer

use thiserror::Error;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur while serving registry operations.
///
/// A subject, version or id that does not exist upstream is not an error:
/// lookups report it as `Ok(None)` and the answer is negatively cached.
///
/// The enum is `Clone` because a single coalesced fetch hands its failure
/// to every caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Network or backend failure during a fetch or write. Never cached.
    #[error("Registry backend error: {0}")]
    TransientBackend(String),

    /// No usable bearer token and no previously bound connection to fall back to
    #[error("Bearer token unavailable: {0}")]
    TokenUnavailable(String),

    /// The token refresh callback failed
    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    /// Malformed input rejected before any cache or network interaction
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation invoked after the owning component was shut down
    #[error("Operation attempted after shutdown")]
    UseAfterShutdown,

    /// The backend does not support the requested operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Configuration could not be parsed or failed validation
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RegistryError {
    /// Shorthand for a backend failure with a formatted message.
    pub fn backend(msg: impl Into<String>) -> Self {
        RegistryError::TransientBackend(msg.into())
    }

    /// Shorthand for an input validation failure.
    pub fn invalid(msg: impl Into<String>) -> Self {
        RegistryError::InvalidInput(msg.into())
    }
}

impl From<toml::de::Error> for RegistryError {
    fn from(err: toml::de::Error) -> Self {
        RegistryError::Config(err.to_string())
    }
}
