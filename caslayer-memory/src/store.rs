//! In-memory storage implementation for key-value backends.
//!
//! Documents are kept in a `HashMap` behind an async-aware read-write lock. CAS tokens come
//! from a counter guarded by the same lock, so every successful write gets a token that no
//! earlier write of any key has used.
//!
//! Expiry deadlines are measured with [`tokio::time::Instant`]. Expired documents stay in
//! the map until the next write to their key, but no operation can observe them.

use async_trait::async_trait;
use bson::Bson;
use mea::rwlock::RwLock;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::trace;

use caslayer_core::{
    backend::{CounterResult, KvBackend, KvBackendBuilder},
    cas::Cas,
    document::Versioned,
    error::{KvStoreError, KvStoreResult},
};

#[derive(Debug, Clone)]
struct Entry {
    value: Bson,
    cas: Cas,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Deadline for an expiry starting now. Zero means no expiry.
fn deadline(expiry: Duration) -> Option<Instant> {
    if expiry.is_zero() {
        return None;
    }

    Instant::now().checked_add(expiry)
}

#[derive(Debug, Default)]
struct StoreState {
    documents: HashMap<String, Entry>,
    last_cas: u64,
}

impl StoreState {
    fn next_cas(&mut self) -> Cas {
        self.last_cas += 1;
        Cas::new(self.last_cas)
    }

    /// The document stored under `key`, unless it has expired.
    fn live(&self, key: &str) -> Option<&Entry> {
        self.documents
            .get(key)
            .filter(|entry| !entry.is_expired())
    }

    /// Drops the document under `key` if it has expired.
    fn purge_expired(&mut self, key: &str) {
        if self
            .documents
            .get(key)
            .is_some_and(Entry::is_expired)
        {
            trace!(key, "dropping expired document");
            self.documents.remove(key);
        }
    }

    /// Stores `value` under `key` with a fresh CAS and returns it.
    fn put(&mut self, key: &str, value: Bson, expires_at: Option<Instant>) -> Cas {
        let cas = self.next_cas();
        self.documents.insert(
            key.to_string(),
            Entry {
                value,
                cas,
                expires_at,
            },
        );
        cas
    }

    /// Checks `expected` against the current CAS of an existing document.
    fn check(&self, key: &str, expected: Option<Cas>) -> KvStoreResult<()> {
        let entry = self
            .live(key)
            .ok_or_else(|| KvStoreError::DocumentNotFound(key.to_string()))?;

        match expected {
            Some(expected) if expected != entry.cas => {
                trace!(key, %expected, actual = %entry.cas, "rejecting stale CAS");
                Err(KvStoreError::CasMismatch {
                    key: key.to_string(),
                    expected,
                    actual: entry.cas,
                })
            }
            _ => Ok(()),
        }
    }

    /// Gives a live document a new CAS and a new deadline.
    fn touch(&mut self, key: &str, expiry: Duration) -> KvStoreResult<&Entry> {
        self.purge_expired(key);
        if !self.documents.contains_key(key) {
            return Err(KvStoreError::DocumentNotFound(key.to_string()));
        }
        let cas = self.next_cas();

        let entry = self
            .documents
            .get_mut(key)
            .ok_or_else(|| KvStoreError::DocumentNotFound(key.to_string()))?;
        entry.cas = cas;
        entry.expires_at = deadline(expiry);

        Ok(&*entry)
    }

    /// Counters keep the expiry of the document they update.
    fn adjust_counter(
        &mut self,
        key: &str,
        initial: Option<u64>,
        apply: impl FnOnce(u64) -> u64,
    ) -> KvStoreResult<CounterResult> {
        self.purge_expired(key);

        let (value, expires_at) = match self.documents.get(key) {
            Some(entry) => (apply(counter_value(key, &entry.value)?), entry.expires_at),
            None => (
                initial.ok_or_else(|| KvStoreError::DocumentNotFound(key.to_string()))?,
                None,
            ),
        };
        let value = value.min(i64::MAX as u64);
        let cas = self.put(key, Bson::Int64(value as i64), expires_at);

        Ok(CounterResult { value, cas })
    }
}

fn counter_value(key: &str, value: &Bson) -> KvStoreResult<u64> {
    let number = match value {
        Bson::Int64(n) => u64::try_from(*n).ok(),
        Bson::Int32(n) => u64::try_from(*n).ok(),
        _ => None,
    };

    number.ok_or_else(|| {
        KvStoreError::InvalidDocument(format!("{key} does not hold a non-negative integer counter"))
    })
}

/// Thread-safe in-memory key-value backend with CAS semantics.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing it to be
/// safely shared across async tasks. Multiple clones of the same instance share the same
/// underlying data.
///
/// Every operation takes the lock exactly once, so a conditional write checks and applies
/// the CAS atomically. An optional per-operation latency stands in for a network round
/// trip: it is awaited before the lock is taken, which gives concurrent tasks the chance
/// to interleave between one task's read and its write.
///
/// # Example
///
/// ```ignore
/// use caslayer_memory::InMemoryStore;
/// use caslayer::backend::KvBackend;
/// use bson::{Bson, doc};
///
/// let store = InMemoryStore::new();
/// let cas = store.upsert("ctr", Bson::Document(doc! { "Number": 0_i64 })).await?;
/// let current = store.get("ctr").await?;
/// assert_eq!(current.cas, cas);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
    latency: Duration,
}

impl InMemoryStore {
    /// Creates a new empty store with no simulated latency.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            latency: Duration::ZERO,
        }
    }

    /// Creates a builder for constructing an `InMemoryStore` with custom options.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// The simulated latency applied to every operation.
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Number of documents currently stored, not counting expired ones.
    pub async fn len(&self) -> usize {
        self.state
            .read()
            .await
            .documents
            .values()
            .filter(|entry| !entry.is_expired())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn round_trip(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl KvBackend for InMemoryStore {
    async fn get(&self, key: &str) -> KvStoreResult<Versioned<Bson>> {
        self.round_trip().await;

        let state = self.state.read().await;
        state
            .live(key)
            .map(|entry| Versioned::new(entry.value.clone(), entry.cas))
            .ok_or_else(|| KvStoreError::DocumentNotFound(key.to_string()))
    }

    async fn insert(&self, key: &str, value: Bson) -> KvStoreResult<Cas> {
        self.round_trip().await;

        let mut state = self.state.write().await;
        state.purge_expired(key);
        if state.documents.contains_key(key) {
            return Err(KvStoreError::DocumentAlreadyExists(key.to_string()));
        }

        Ok(state.put(key, value, None))
    }

    async fn upsert(&self, key: &str, value: Bson) -> KvStoreResult<Cas> {
        self.round_trip().await;

        Ok(self
            .state
            .write()
            .await
            .put(key, value, None))
    }

    async fn upsert_with_expiry(&self, key: &str, value: Bson, expiry: Duration) -> KvStoreResult<Cas> {
        self.round_trip().await;

        Ok(self
            .state
            .write()
            .await
            .put(key, value, deadline(expiry)))
    }

    async fn replace(&self, key: &str, value: Bson, expected: Option<Cas>) -> KvStoreResult<Cas> {
        self.round_trip().await;

        let mut state = self.state.write().await;
        state.check(key, expected)?;

        Ok(state.put(key, value, None))
    }

    async fn remove(&self, key: &str, expected: Option<Cas>) -> KvStoreResult<()> {
        self.round_trip().await;

        let mut state = self.state.write().await;
        state.check(key, expected)?;
        state.documents.remove(key);

        Ok(())
    }

    async fn increment(&self, key: &str, delta: u64, initial: Option<u64>) -> KvStoreResult<CounterResult> {
        self.round_trip().await;

        self.state
            .write()
            .await
            .adjust_counter(key, initial, |current| current.saturating_add(delta))
    }

    async fn decrement(&self, key: &str, delta: u64, initial: Option<u64>) -> KvStoreResult<CounterResult> {
        self.round_trip().await;

        self.state
            .write()
            .await
            .adjust_counter(key, initial, |current| current.saturating_sub(delta))
    }

    async fn touch(&self, key: &str, expiry: Duration) -> KvStoreResult<Cas> {
        self.round_trip().await;

        let mut state = self.state.write().await;
        Ok(state.touch(key, expiry)?.cas)
    }

    async fn get_and_touch(&self, key: &str, expiry: Duration) -> KvStoreResult<Versioned<Bson>> {
        self.round_trip().await;

        let mut state = self.state.write().await;
        let entry = state.touch(key, expiry)?;

        Ok(Versioned::new(entry.value.clone(), entry.cas))
    }

    /// Drops every document. Clones of this store share the same state and see it empty.
    async fn shutdown(self) -> KvStoreResult<()> {
        let mut state = self.state.write().await;
        trace!(documents = state.documents.len(), "shutting down in-memory store");
        state.documents.clear();

        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use caslayer_memory::InMemoryStore;
/// use caslayer::backend::KvBackendBuilder;
/// use std::time::Duration;
///
/// let store = InMemoryStore::builder()
///     .latency(Duration::from_millis(1))
///     .build()
///     .await?;
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryStoreBuilder {
    latency: Duration,
}

impl InMemoryStoreBuilder {
    /// Delay awaited before every operation, to model a network round trip.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl KvBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new, empty [`InMemoryStore`].
    async fn build(self) -> KvStoreResult<Self::Backend> {
        Ok(InMemoryStore {
            latency: self.latency,
            ..InMemoryStore::new()
        })
    }
}
