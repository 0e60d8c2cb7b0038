//! In-process registry backend.
//!
//! Keeps subjects, versions and ids in memory and counts every call it
//! serves, which makes it suitable for tests and local demos. Failures and
//! latency can be injected to exercise the error and coalescing paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{ConnectionFactory, ConnectionSettings, DeleteCapability, DynBackend, RegistryBackend};
use crate::error::{RegistryError, RegistryResult};
use crate::types::{SchemaDocument, SchemaFormat, SchemaId, SchemaRecord, SchemaVersion};

#[derive(Debug, Clone)]
struct StoredSchema {
    schema: String,
    format: SchemaFormat,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// subject -> version -> id
    subjects: BTreeMap<String, BTreeMap<SchemaVersion, SchemaId>>,
    schemas: BTreeMap<SchemaId, StoredSchema>,
    next_id: SchemaId,
}

impl RegistryState {
    fn id_for(&mut self, document: &SchemaDocument) -> SchemaId {
        let existing = self
            .schemas
            .iter()
            .find(|(_, s)| s.schema == document.schema && s.format == document.format)
            .map(|(id, _)| *id);

        existing.unwrap_or_else(|| {
            self.next_id += 1;
            self.schemas.insert(
                self.next_id,
                StoredSchema {
                    schema: document.schema.clone(),
                    format: document.format,
                },
            );
            self.next_id
        })
    }
}

/// Per-operation call counters.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub fetch_by_subject_version: AtomicUsize,
    pub fetch_by_id: AtomicUsize,
    pub register: AtomicUsize,
    pub delete_version: AtomicUsize,
    pub delete_subject: AtomicUsize,
}

/// In-memory schema registry.
#[derive(Debug)]
pub struct MemoryRegistry {
    state: Mutex<RegistryState>,
    calls: CallCounts,
    failing: AtomicBool,
    latency: Option<Duration>,
    delete_capability: DeleteCapability,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            calls: CallCounts::default(),
            failing: AtomicBool::new(false),
            latency: None,
            delete_capability: DeleteCapability::Version,
        }
    }

    /// Delay every backend call by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    #[must_use]
    pub fn with_delete_capability(mut self, capability: DeleteCapability) -> Self {
        self.delete_capability = capability;
        self
    }

    /// Make every subsequent call fail with a backend error until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> &CallCounts {
        &self.calls
    }

    pub fn fetch_by_subject_version_calls(&self) -> usize {
        self.calls.fetch_by_subject_version.load(Ordering::SeqCst)
    }

    pub fn fetch_by_id_calls(&self) -> usize {
        self.calls.fetch_by_id.load(Ordering::SeqCst)
    }

    pub fn register_calls(&self) -> usize {
        self.calls.register.load(Ordering::SeqCst)
    }

    /// Store `document` under an explicit `version` of `subject`, bypassing call counters.
    pub fn put_version(
        &self,
        subject: &str,
        version: SchemaVersion,
        document: &SchemaDocument,
    ) -> SchemaId {
        let mut state = self.lock();
        let id = state.id_for(document);
        state
            .subjects
            .entry(subject.to_string())
            .or_default()
            .insert(version, id);
        id
    }

    /// Versions currently registered under `subject`.
    pub fn versions(&self, subject: &str) -> Vec<SchemaVersion> {
        self.lock()
            .subjects
            .get(subject)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, counter: &AtomicUsize, operation: &str) -> RegistryResult<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RegistryError::backend(format!(
                "{operation}: registry unavailable"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryBackend for MemoryRegistry {
    async fn fetch_by_subject_version(
        &self,
        subject: &str,
        version: SchemaVersion,
    ) -> RegistryResult<Option<SchemaRecord>> {
        self.enter(&self.calls.fetch_by_subject_version, "fetch_by_subject_version")
            .await?;

        let state = self.lock();
        let record = state
            .subjects
            .get(subject)
            .and_then(|versions| versions.get(&version))
            .and_then(|id| {
                state.schemas.get(id).map(|stored| {
                    SchemaRecord::new(*id, stored.schema.clone(), stored.format).with_subject(subject)
                })
            });
        Ok(record)
    }

    async fn fetch_by_id(&self, id: SchemaId) -> RegistryResult<Option<SchemaRecord>> {
        self.enter(&self.calls.fetch_by_id, "fetch_by_id").await?;

        let state = self.lock();
        Ok(state
            .schemas
            .get(&id)
            .map(|stored| SchemaRecord::new(id, stored.schema.clone(), stored.format)))
    }

    async fn register(&self, subject: &str, document: &SchemaDocument) -> RegistryResult<SchemaId> {
        self.enter(&self.calls.register, "register").await?;

        let mut state = self.lock();
        let id = state.id_for(document);
        let versions = state.subjects.entry(subject.to_string()).or_default();
        if !versions.values().any(|existing| *existing == id) {
            let next = versions.keys().next_back().copied().unwrap_or(0) + 1;
            versions.insert(next, id);
        }
        Ok(id)
    }

    async fn delete_version(&self, subject: &str, version: SchemaVersion) -> RegistryResult<()> {
        self.enter(&self.calls.delete_version, "delete_version").await?;

        let mut state = self.lock();
        if let Some(versions) = state.subjects.get_mut(subject) {
            versions.remove(&version);
        }
        Ok(())
    }

    async fn delete_subject(&self, subject: &str) -> RegistryResult<()> {
        self.enter(&self.calls.delete_subject, "delete_subject").await?;

        self.lock().subjects.remove(subject);
        Ok(())
    }

    fn delete_capability(&self) -> DeleteCapability {
        self.delete_capability
    }
}

/// One connection to a shared [`MemoryRegistry`], bound to a token.
#[derive(Debug)]
pub struct MemoryConnection {
    registry: Arc<MemoryRegistry>,
    token: Option<String>,
    closed: AtomicBool,
}

impl MemoryConnection {
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryBackend for MemoryConnection {
    async fn fetch_by_subject_version(
        &self,
        subject: &str,
        version: SchemaVersion,
    ) -> RegistryResult<Option<SchemaRecord>> {
        self.registry.fetch_by_subject_version(subject, version).await
    }

    async fn fetch_by_id(&self, id: SchemaId) -> RegistryResult<Option<SchemaRecord>> {
        self.registry.fetch_by_id(id).await
    }

    async fn register(&self, subject: &str, document: &SchemaDocument) -> RegistryResult<SchemaId> {
        self.registry.register(subject, document).await
    }

    async fn delete_version(&self, subject: &str, version: SchemaVersion) -> RegistryResult<()> {
        self.registry.delete_version(subject, version).await
    }

    async fn delete_subject(&self, subject: &str) -> RegistryResult<()> {
        self.registry.delete_subject(subject).await
    }

    fn delete_capability(&self) -> DeleteCapability {
        self.registry.delete_capability()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connection factory over a shared [`MemoryRegistry`].
///
/// Records the settings of every connection it opens.
#[derive(Debug)]
pub struct MemoryConnectionFactory {
    registry: Arc<MemoryRegistry>,
    opened: Mutex<Vec<(ConnectionSettings, Arc<MemoryConnection>)>>,
    failing: AtomicBool,
}

impl MemoryConnectionFactory {
    pub fn new(registry: Arc<MemoryRegistry>) -> Self {
        Self {
            registry,
            opened: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<MemoryRegistry> {
        &self.registry
    }

    /// Make subsequent `connect` calls fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.opened().len()
    }

    /// Settings of every connection opened so far, oldest first.
    pub fn settings(&self) -> Vec<ConnectionSettings> {
        self.opened().iter().map(|(s, _)| s.clone()).collect()
    }

    /// Every connection opened so far, oldest first.
    pub fn connections(&self) -> Vec<Arc<MemoryConnection>> {
        self.opened().iter().map(|(_, c)| c.clone()).collect()
    }

    fn opened(&self) -> MutexGuard<'_, Vec<(ConnectionSettings, Arc<MemoryConnection>)>> {
        self.opened.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    async fn connect(&self, settings: &ConnectionSettings) -> RegistryResult<DynBackend> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RegistryError::backend(format!(
                "cannot connect to {}",
                settings.url
            )));
        }

        let connection = Arc::new(MemoryConnection {
            registry: self.registry.clone(),
            token: settings.bearer_token.clone(),
            closed: AtomicBool::new(false),
        });
        self.opened().push((settings.clone(), connection.clone()));
        Ok(connection)
    }
}
