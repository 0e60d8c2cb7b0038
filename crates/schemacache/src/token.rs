//! Bearer token lifecycle.
//!
//! [`TokenManager`] hands out the current bearer token and refreshes it
//! through a caller-supplied [`TokenProvider`] once it is about to expire.
//! Refreshes are serialized: concurrent callers that find a stale token
//! queue behind a single provider call and reuse its result.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::error::{RegistryError, RegistryResult};
use crate::metrics::{MetricsCollector, RecorderMetrics};

/// Tokens are refreshed this long before they expire.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::minutes(1);

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// A bearer token together with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

impl IssuedToken {
    pub fn new(token: impl Into<String>, expires_at: OffsetDateTime) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Token valid for `lifetime` from now.
    pub fn expiring_in(token: impl Into<String>, lifetime: Duration) -> Self {
        Self::new(token, OffsetDateTime::now_utc() + lifetime)
    }
}

/// Source of fresh bearer tokens, typically an identity provider call.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self) -> RegistryResult<IssuedToken>;
}

#[async_trait]
impl<F, Fut> TokenProvider for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = RegistryResult<IssuedToken>> + Send + 'static,
{
    async fn fetch_token(&self) -> RegistryResult<IssuedToken> {
        (self)().await
    }
}

/// Outcome of a refresh attempt, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    Refreshed { expires_at: OffsetDateTime },
    RefreshFailed { error: String },
}

#[derive(Debug, Default)]
struct TokenState {
    token: Option<String>,
    /// `None` until the first successful refresh
    expires_at: Option<OffsetDateTime>,
    /// Bumped on every successful refresh
    generation: u64,
}

impl TokenState {
    fn usable_token(&self, now: OffsetDateTime, margin: Duration) -> Option<&str> {
        let expires_at = self.expires_at?;
        if now >= expires_at - margin {
            return None;
        }
        self.token.as_deref()
    }
}

/// Caches a bearer token and refreshes it ahead of expiry.
pub struct TokenManager {
    provider: Arc<dyn TokenProvider>,
    state: ArcSwap<TokenState>,
    refresh_lock: Mutex<()>,
    refresh_margin: Duration,
    metrics: Arc<dyn MetricsCollector>,
    events: broadcast::Sender<TokenEvent>,
    closed: AtomicBool,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("expires_at", &self.expires_at())
            .field("refresh_margin", &self.refresh_margin)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl TokenManager {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            provider,
            state: ArcSwap::from_pointee(TokenState::default()),
            refresh_lock: Mutex::new(()),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            metrics: Arc::new(RecorderMetrics),
            events,
            closed: AtomicBool::new(false),
        }
    }

    /// Count successful refreshes in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TokenEvent> {
        self.events.subscribe()
    }

    /// Current token without refreshing, if one was ever issued.
    pub fn current_token(&self) -> Option<String> {
        self.state.load().token.clone()
    }

    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.state.load().expires_at
    }

    /// Return the current token, refreshing it first when it was never
    /// issued or expires within the refresh margin.
    pub async fn get_token(&self) -> RegistryResult<String> {
        self.ensure_open()?;

        let state = self.state.load_full();
        if let Some(token) = state.usable_token(OffsetDateTime::now_utc(), self.refresh_margin) {
            return Ok(token.to_string());
        }

        self.refresh(state.generation, false).await
    }

    /// Refresh regardless of the remaining validity.
    ///
    /// A caller that had to wait for a refresh started by someone else
    /// takes that result instead of calling the provider again.
    pub async fn force_refresh(&self) -> RegistryResult<String> {
        self.ensure_open()?;
        let generation = self.state.load().generation;
        self.refresh(generation, true).await
    }

    /// Drop the token. Every later call fails with
    /// [`RegistryError::UseAfterShutdown`].
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.store(Arc::new(TokenState::default()));
        debug!("Token manager shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn refresh(&self, observed_generation: u64, force: bool) -> RegistryResult<String> {
        let _guard = self.refresh_lock.lock().await;
        self.ensure_open()?;

        let current = self.state.load_full();
        if force {
            if current.generation != observed_generation {
                if let Some(token) = current.token.as_deref() {
                    return Ok(token.to_string());
                }
            }
        } else if let Some(token) = current.usable_token(OffsetDateTime::now_utc(), self.refresh_margin) {
            return Ok(token.to_string());
        }

        let issued = match self.provider.fetch_token().await {
            Ok(issued) if issued.token.trim().is_empty() => {
                return Err(self.refresh_failed(RegistryError::TokenRefresh(
                    "provider returned an empty token".to_string(),
                )));
            }
            Ok(issued) => issued,
            Err(err) => return Err(self.refresh_failed(err)),
        };

        if self.is_shutdown() {
            return Err(RegistryError::UseAfterShutdown);
        }

        let IssuedToken { token, expires_at } = issued;
        self.state.store(Arc::new(TokenState {
            token: Some(token.clone()),
            expires_at: Some(expires_at),
            generation: current.generation + 1,
        }));
        self.metrics.increment_token_refresh();
        info!(expires_at = %expires_at, "Bearer token refreshed");
        if self.events.receiver_count() > 0 {
            let _ = self.events.send(TokenEvent::Refreshed { expires_at });
        }

        Ok(token)
    }

    fn refresh_failed(&self, err: RegistryError) -> RegistryError {
        let err = match err {
            RegistryError::TokenRefresh(_) => err,
            other => RegistryError::TokenRefresh(other.to_string()),
        };
        warn!(error = %err, "Bearer token refresh failed");
        if self.events.receiver_count() > 0 {
            let _ = self.events.send(TokenEvent::RefreshFailed {
                error: err.to_string(),
            });
        }
        err
    }

    fn ensure_open(&self) -> RegistryResult<()> {
        if self.is_shutdown() {
            return Err(RegistryError::UseAfterShutdown);
        }
        Ok(())
    }
}
