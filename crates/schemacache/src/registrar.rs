//! Read-through caching registrar with request coalescing.
//!
//! Wraps a [`RegistryBackend`] and serves lookups from the [`SchemaCache`]
//! whenever possible. Concurrent lookups for the same cache key share one
//! upstream call: the first caller starts a pending fetch, later callers
//! join it, and everybody receives the same result (including failures).
//!
//! ## Cache keys
//!
//! - `<subject>:<version>` - lookup by subject and version
//! - `<subject>:latest` - most recently registered schema of a subject
//! - `id:<id>` - lookup by schema id
//!
//! Lookups by version and by id keep separate pending tables since they hit
//! different upstream endpoints.
//!
//! ## Pending fetches
//!
//! A pending fetch is a [`Shared`] future. The table only keeps a weak handle,
//! so a fetch whose callers were all cancelled is dropped, and its slot is
//! released either way: on completion or on drop.
//!
//! A fetch still in flight when `register` or `delete_version` invalidates the
//! subject hands its answer to its own waiters but does not cache it: writes
//! go through [`SchemaCache::set_if_current`] with the epoch observed before
//! the upstream call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::{BoxFuture, FutureExt, Shared, WeakShared};
use tracing::debug;

use crate::backend::{DeleteCapability, DynBackend};
use crate::cache::{CacheValue, SchemaCache};
use crate::error::{RegistryError, RegistryResult};
use crate::types::{SchemaDocument, SchemaId, SchemaRecord, SchemaVersion};

/// Cache key of a subject/version lookup.
pub fn version_key(subject: &str, version: SchemaVersion) -> String {
    format!("{subject}:{version}")
}

/// Cache key of the most recently registered schema of a subject.
pub fn latest_key(subject: &str) -> String {
    format!("{subject}:latest")
}

/// Cache key of an id lookup.
pub fn id_key(id: SchemaId) -> String {
    format!("id:{id}")
}

fn subject_prefix(subject: &str) -> String {
    format!("{subject}:")
}

type FetchOutcome = RegistryResult<CacheValue>;
type FetchFuture = BoxFuture<'static, FetchOutcome>;

struct PendingSlot {
    ticket: u64,
    fetch: WeakShared<FetchFuture>,
}

/// In-flight fetches keyed by cache key. At most one slot per key.
#[derive(Default)]
struct PendingTable {
    slots: DashMap<String, PendingSlot>,
    next_ticket: AtomicU64,
}

/// Releases a pending slot when the fetch body finishes or is dropped.
///
/// Only the slot carrying the same ticket is removed, so a late release
/// never clears a newer fetch for the same key.
struct PendingRelease {
    table: Arc<PendingTable>,
    key: String,
    ticket: u64,
}

impl Drop for PendingRelease {
    fn drop(&mut self) {
        self.table
            .slots
            .remove_if(&self.key, |_, slot| slot.ticket == self.ticket);
    }
}

impl PendingTable {
    /// Join the pending fetch for `key`, or start one with `start`.
    fn join_or_start<F>(self: &Arc<Self>, key: &str, start: F) -> Shared<FetchFuture>
    where
        F: FnOnce(PendingRelease) -> FetchFuture,
    {
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if let Some(fetch) = occupied.get().fetch.upgrade() {
                    debug!(key, "Joining pending fetch");
                    return fetch;
                }
                let (slot, fetch) = self.new_fetch(key, start);
                match slot {
                    Some(slot) => {
                        occupied.insert(slot);
                    }
                    None => {
                        occupied.remove();
                    }
                }
                fetch
            }
            Entry::Vacant(vacant) => {
                let (slot, fetch) = self.new_fetch(key, start);
                if let Some(slot) = slot {
                    vacant.insert(slot);
                }
                fetch
            }
        }
    }

    fn new_fetch<F>(self: &Arc<Self>, key: &str, start: F) -> (Option<PendingSlot>, Shared<FetchFuture>)
    where
        F: FnOnce(PendingRelease) -> FetchFuture,
    {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let release = PendingRelease {
            table: Arc::clone(self),
            key: key.to_string(),
            ticket,
        };
        let fetch = start(release).shared();
        let slot = fetch.downgrade().map(|weak| PendingSlot { ticket, fetch: weak });
        (slot, fetch)
    }

    fn forget(&self, key: &str) {
        self.slots.remove(key);
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Caching, coalescing wrapper around one backend connection.
pub struct CachingRegistrar {
    backend: DynBackend,
    cache: Arc<SchemaCache>,
    delete_capability: DeleteCapability,
    by_version: Arc<PendingTable>,
    by_id: Arc<PendingTable>,
}

impl std::fmt::Debug for CachingRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingRegistrar")
            .field("delete_capability", &self.delete_capability)
            .field("pending_fetches", &self.pending_fetches())
            .field("cache", &self.cache)
            .finish()
    }
}

impl CachingRegistrar {
    /// Wrap `backend`, resolving its delete capability once.
    pub fn new(backend: DynBackend, cache: Arc<SchemaCache>) -> Self {
        let delete_capability = backend.delete_capability();
        Self {
            backend,
            cache,
            delete_capability,
            by_version: Arc::new(PendingTable::default()),
            by_id: Arc::new(PendingTable::default()),
        }
    }

    pub fn backend(&self) -> &DynBackend {
        &self.backend
    }

    pub fn cache(&self) -> &Arc<SchemaCache> {
        &self.cache
    }

    pub fn delete_capability(&self) -> DeleteCapability {
        self.delete_capability
    }

    /// Number of fetches currently in flight across both tables.
    pub fn pending_fetches(&self) -> usize {
        self.by_version.len() + self.by_id.len()
    }

    /// Look up `version` of `subject`.
    ///
    /// `Ok(None)` means the registry has no such version; that answer is
    /// cached. A found record is also cached under its id.
    pub async fn get_by_subject_version(
        &self,
        subject: &str,
        version: SchemaVersion,
    ) -> RegistryResult<Option<Arc<SchemaRecord>>> {
        require_subject(subject)?;
        let key = version_key(subject, version);

        if let Some(cached) = self.cache.try_get(&key) {
            return Ok(cached.into_record());
        }

        let fetch = self.by_version.join_or_start(&key, |release| {
            let backend = Arc::clone(&self.backend);
            let cache = Arc::clone(&self.cache);
            let subject = subject.to_string();
            let key = key.clone();

            async move {
                let _release = release;

                // Another fetch may have filled the entry before this one started
                if let Some(cached) = cache.peek(&key) {
                    return Ok(cached);
                }

                let epoch = cache.invalidation_epoch();
                let value = match backend.fetch_by_subject_version(&subject, version).await? {
                    Some(mut record) => {
                        if record.subject.is_none() {
                            record.subject = Some(subject);
                        }
                        let value = CacheValue::present(record);
                        if let Some(record) = value.record() {
                            cache.set_if_current(id_key(record.id), value.clone(), epoch);
                        }
                        value
                    }
                    None => {
                        debug!(key = %key, "Schema not found, caching negative result");
                        CacheValue::Absent
                    }
                };
                cache.set_if_current(key, value.clone(), epoch);
                Ok(value)
            }
            .boxed()
        });

        fetch.await.map(CacheValue::into_record)
    }

    /// Look up a schema by its id. Records found this way carry no subject.
    pub async fn get_by_id(&self, id: SchemaId) -> RegistryResult<Option<Arc<SchemaRecord>>> {
        let key = id_key(id);

        if let Some(cached) = self.cache.try_get(&key) {
            return Ok(cached.into_record());
        }

        let fetch = self.by_id.join_or_start(&key, |release| {
            let backend = Arc::clone(&self.backend);
            let cache = Arc::clone(&self.cache);
            let key = key.clone();

            async move {
                let _release = release;

                if let Some(cached) = cache.peek(&key) {
                    return Ok(cached);
                }

                let epoch = cache.invalidation_epoch();
                let value: CacheValue = backend.fetch_by_id(id).await?.into();
                if value.is_absent() {
                    debug!(key = %key, "Schema not found, caching negative result");
                }
                cache.set_if_current(key, value.clone(), epoch);
                Ok(value)
            }
            .boxed()
        });

        fetch.await.map(CacheValue::into_record)
    }

    /// Register `document` under `subject`.
    ///
    /// Every cached `<subject>:*` entry is dropped first, then the new record
    /// is cached as `<subject>:latest` and `id:<id>`. Specific versions are
    /// not populated.
    pub async fn register(&self, subject: &str, document: &SchemaDocument) -> RegistryResult<SchemaId> {
        require_subject(subject)?;
        if document.schema.trim().is_empty() {
            return Err(RegistryError::invalid("schema cannot be empty"));
        }

        let id = self.backend.register(subject, document).await?;

        let mut record = SchemaRecord::new(id, document.schema.clone(), document.format)
            .with_subject(subject);
        record.role = document.role;
        let value = CacheValue::present(record);

        let swept = self.cache.remove_prefix(&subject_prefix(subject));
        self.cache.set(latest_key(subject), value.clone());
        self.cache.set(id_key(id), value);

        debug!(subject, id, swept, "Schema registered and cached");
        Ok(id)
    }

    /// Delete `version` of `subject` and invalidate everything cached for the subject.
    ///
    /// Backends that can only delete whole subjects get a subject delete.
    pub async fn delete_version(&self, subject: &str, version: SchemaVersion) -> RegistryResult<()> {
        require_subject(subject)?;

        match self.delete_capability {
            DeleteCapability::Version => self.backend.delete_version(subject, version).await?,
            DeleteCapability::SubjectOnly => self.backend.delete_subject(subject).await?,
        }

        let key = version_key(subject, version);
        self.cache.remove(&key);
        self.cache.remove(&latest_key(subject));
        self.by_version.forget(&key);
        let swept = self.cache.remove_prefix(&subject_prefix(subject));

        debug!(subject, version, swept, "Cache invalidated after delete");
        Ok(())
    }
}

pub(crate) fn require_subject(subject: &str) -> RegistryResult<()> {
    if subject.trim().is_empty() {
        return Err(RegistryError::invalid("subject cannot be empty"));
    }
    Ok(())
}
