//! Bounded TTL cache for registry lookups.
//!
//! Holds both positive entries (a [`SchemaRecord`]) and negative entries
//! (a confirmation that the registry answered "not found"). A negative entry
//! is a real value: looking it up is a hit.
//!
//! ## Eviction
//!
//! - **TTL**: an entry older than the configured time-to-live is treated as
//!   absent and removed the next time it is looked up.
//! - **Capacity**: inserting a new key into a full cache first evicts the
//!   entry with the fewest hits, oldest insertion breaking ties.
//!
//! Reads go straight to the `DashMap`. Inserts are serialized by a short
//! mutex so that the capacity check and the insert happen together.
//!
//! ## Invalidation epoch
//!
//! Every explicit removal (`remove`, `remove_prefix`, `clear`) advances an
//! epoch before touching the map. A writer that read its value upstream
//! before the removal uses [`SchemaCache::set_if_current`] with the epoch it
//! observed beforehand, so a stale answer never lands after the removal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::metrics::{MetricsCollector, RecorderMetrics};
use crate::types::SchemaRecord;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Value slot of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    /// The registry returned this record
    Present(Arc<SchemaRecord>),
    /// The registry confirmed the lookup does not exist
    Absent,
}

impl CacheValue {
    pub fn present(record: SchemaRecord) -> Self {
        CacheValue::Present(Arc::new(record))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, CacheValue::Absent)
    }

    pub fn record(&self) -> Option<&Arc<SchemaRecord>> {
        match self {
            CacheValue::Present(record) => Some(record),
            CacheValue::Absent => None,
        }
    }

    pub fn into_record(self) -> Option<Arc<SchemaRecord>> {
        match self {
            CacheValue::Present(record) => Some(record),
            CacheValue::Absent => None,
        }
    }
}

impl From<Option<SchemaRecord>> for CacheValue {
    fn from(record: Option<SchemaRecord>) -> Self {
        record.map_or(CacheValue::Absent, CacheValue::present)
    }
}

/// Notification published for every cache interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Hit { key: String },
    Miss { key: String },
    Set { key: String },
    Evicted { key: String },
    Expired { key: String },
    Cleared,
}

struct CacheEntry {
    value: CacheValue,
    inserted_at: Instant,
    hits: AtomicU64,
}

impl CacheEntry {
    fn new(value: CacheValue) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
            hits: AtomicU64::new(0),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.is_expired_at(ttl, Instant::now())
    }

    /// An entry aged exactly `ttl` is still fresh.
    fn is_expired_at(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > ttl
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Time-bounded, capacity-bounded schema cache.
pub struct SchemaCache {
    entries: DashMap<String, CacheEntry>,
    max_size: usize,
    ttl: Duration,
    insert_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    metrics: Arc<dyn MetricsCollector>,
    events: broadcast::Sender<CacheEvent>,
}

impl std::fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCache")
            .field("max_size", &self.max_size)
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

impl SchemaCache {
    /// Create a cache holding at most `max_size` entries (at least one) for `ttl` each.
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: DashMap::new(),
            max_size: max_size.max(1),
            ttl,
            insert_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            metrics: Arc::new(RecorderMetrics),
            events,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_size, config.ttl())
    }

    /// Report hit/miss/set counters to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Subscribe to hit/miss/set notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up `key`.
    ///
    /// Returns `None` on a miss. A fresh negative entry is returned as
    /// `Some(CacheValue::Absent)` and counts as a hit.
    pub fn try_get(&self, key: &str) -> Option<CacheValue> {
        if key.is_empty() {
            self.record_miss(key);
            return None;
        }

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(self.ttl) {
                entry.hits.fetch_add(1, Ordering::Relaxed);
                let value = entry.value.clone();
                drop(entry);
                self.record_hit(key);
                return Some(value);
            }
            // Entry expired, remove it unless a fresh insert replaced it meanwhile
            drop(entry);
            if self
                .entries
                .remove_if(key, |_, e| e.is_expired(self.ttl))
                .is_some()
            {
                debug!(key, "Cache entry expired");
                self.publish(|| CacheEvent::Expired {
                    key: key.to_string(),
                });
            }
        }

        self.record_miss(key);
        None
    }

    /// Look up `key` without touching hit/miss counters or notifications.
    pub fn peek(&self, key: &str) -> Option<CacheValue> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(self.ttl))
            .map(|entry| entry.value.clone())
    }

    /// Insert or overwrite `key`, resetting its hit counter and age.
    pub fn set(&self, key: impl Into<String>, value: CacheValue) {
        let key = key.into();
        if key.is_empty() {
            warn!("Attempt to set cache entry with empty key");
            return;
        }

        {
            let _guard = self
                .insert_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !self.entries.contains_key(&key) && self.entries.len() >= self.max_size {
                self.evict_one();
            }
            self.entries.insert(key.clone(), CacheEntry::new(value));
        }

        self.metrics.increment_cache_set();
        debug!(key = %key, "Cache set");
        self.publish(|| CacheEvent::Set { key });
    }

    /// Current invalidation epoch. Capture it before an upstream read that
    /// will be passed to [`SchemaCache::set_if_current`].
    pub fn invalidation_epoch(&self) -> u64 {
        self.invalidations.load(Ordering::SeqCst)
    }

    /// Insert `key` unless an explicit removal happened since `epoch` was read.
    ///
    /// Returns whether the value was kept.
    pub fn set_if_current(&self, key: impl Into<String>, value: CacheValue, epoch: u64) -> bool {
        let key = key.into();
        if self.invalidation_epoch() != epoch {
            debug!(key = %key, "Skipping cache write invalidated in flight");
            return false;
        }
        self.set(key.clone(), value);
        // A removal may have swept past the key before the insert landed
        if self.invalidation_epoch() != epoch {
            self.remove_entry(&key);
            debug!(key = %key, "Rolled back cache write invalidated in flight");
            return false;
        }
        true
    }

    /// Remove `key`. No-op if absent.
    pub fn remove(&self, key: &str) -> bool {
        self.invalidate();
        self.remove_entry(key)
    }

    /// Snapshot of the keys starting with `prefix`.
    ///
    /// Best effort: entries inserted or removed while the snapshot is taken
    /// may or may not be included. An empty prefix matches nothing.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        if prefix.is_empty() {
            return Vec::new();
        }
        self.entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Remove every key starting with `prefix`. Returns how many were removed.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        self.invalidate();
        self.keys_with_prefix(prefix)
            .iter()
            .filter(|key| self.remove_entry(key))
            .count()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.invalidate();
        self.entries.clear();
        debug!("Cache cleared");
        self.publish(|| CacheEvent::Cleared);
    }

    /// Remove entries past their TTL without waiting for them to be looked up.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            if entry.is_expired(self.ttl) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            max_size: self.max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    fn remove_entry(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            debug!(key, "Cache entry removed");
        }
        removed
    }

    /// Evict the entry with the fewest hits, the oldest one on a tie.
    fn evict_one(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| (entry.hits.load(Ordering::Relaxed), entry.inserted_at))
            .map(|entry| entry.key().clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Evicted entry from cache");
            self.publish(|| CacheEvent::Evicted { key });
        }
    }

    fn record_hit(&self, key: &str) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.metrics.increment_cache_hit();
        debug!(key, "Cache hit");
        self.publish(|| CacheEvent::Hit {
            key: key.to_string(),
        });
    }

    fn record_miss(&self, key: &str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.metrics.increment_cache_miss();
        debug!(key, "Cache miss");
        self.publish(|| CacheEvent::Miss {
            key: key.to_string(),
        });
    }

    fn publish(&self, event: impl FnOnce() -> CacheEvent) {
        if self.events.receiver_count() > 0 {
            let _ = self.events.send(event());
        }
    }
}
