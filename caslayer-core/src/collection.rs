//! Typed access to the documents of a backend.
//!
//! [`Collection`] wraps a [`KvBackend`] and converts between serde types and the stored
//! BSON on every call, so application code deals in its own structs and [`Cas`] tokens.
//!
//! # Example
//!
//! ```ignore
//! use caslayer::{collection::Collection, memory::InMemoryStore, retry::RetryPolicy};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Data {
//!     #[serde(rename = "Number")]
//!     pub number: i64,
//! }
//!
//! let collection = Collection::new(InMemoryStore::new());
//! collection.upsert("ctr", &Data { number: 0 }).await?;
//! collection
//!     .mutate_with_cas("ctr", RetryPolicy::default(), |mut data: Data| {
//!         data.number += 1;
//!         data
//!     })
//!     .await?;
//! ```

use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

use crate::{
    backend::{CounterResult, KvBackend},
    cas::Cas,
    document::{DocumentExt, Versioned},
    error::KvStoreResult,
    retry::{CasExecutor, MutationOutcome, RetryPolicy, update_without_cas},
};

/// A typed view over a key-value backend.
///
/// # Type Parameters
///
/// * `B` - The storage backend type. Pass `&B` or `Arc<B>` to share one backend between
///   several collections.
#[derive(Debug, Clone)]
pub struct Collection<B: KvBackend> {
    backend: B,
}

impl<B: KvBackend> Collection<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Consumes the collection and returns the backend.
    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Reads and deserializes a document.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` if the key does not exist and `Serialization` if the
    /// stored value does not deserialize into `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> KvStoreResult<Versioned<T>> {
        self.backend
            .get(key)
            .await?
            .content_as()
    }

    /// Returns `true` if a document is stored under `key`.
    pub async fn exists(&self, key: &str) -> KvStoreResult<bool> {
        match self.backend.get(key).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Creates a document, failing with `DocumentAlreadyExists` if the key is taken.
    pub async fn insert<T: Serialize + DeserializeOwned>(&self, key: &str, value: &T) -> KvStoreResult<Cas> {
        self.backend
            .insert(key, value.to_bson()?)
            .await
    }

    /// Writes a document whether or not it exists.
    pub async fn upsert<T: Serialize + DeserializeOwned>(&self, key: &str, value: &T) -> KvStoreResult<Cas> {
        self.backend
            .upsert(key, value.to_bson()?)
            .await
    }

    /// Writes a document that expires after `expiry`.
    pub async fn upsert_with_expiry<T: Serialize + DeserializeOwned>(
        &self,
        key: &str,
        value: &T,
        expiry: Duration,
    ) -> KvStoreResult<Cas> {
        self.backend
            .upsert_with_expiry(key, value.to_bson()?, expiry)
            .await
    }

    /// Resets the expiry of a document. The returned CAS supersedes any earlier one.
    pub async fn touch(&self, key: &str, expiry: Duration) -> KvStoreResult<Cas> {
        self.backend.touch(key, expiry).await
    }

    /// Reads a document and resets its expiry. See [`KvBackend::get_and_touch`].
    pub async fn get_and_touch<T: DeserializeOwned>(&self, key: &str, expiry: Duration) -> KvStoreResult<Versioned<T>> {
        self.backend
            .get_and_touch(key, expiry)
            .await?
            .content_as()
    }

    /// Replaces an existing document, conditionally on `expected` when given.
    pub async fn replace<T: Serialize + DeserializeOwned>(
        &self,
        key: &str,
        value: &T,
        expected: Option<Cas>,
    ) -> KvStoreResult<Cas> {
        self.backend
            .replace(key, value.to_bson()?, expected)
            .await
    }

    /// Removes a document, conditionally on `expected` when given.
    pub async fn remove(&self, key: &str, expected: Option<Cas>) -> KvStoreResult<()> {
        self.backend.remove(key, expected).await
    }

    /// Adds `delta` to a counter document. See [`KvBackend::increment`].
    pub async fn increment(&self, key: &str, delta: u64, initial: Option<u64>) -> KvStoreResult<CounterResult> {
        self.backend
            .increment(key, delta, initial)
            .await
    }

    /// Subtracts `delta` from a counter document. See [`KvBackend::decrement`].
    pub async fn decrement(&self, key: &str, delta: u64, initial: Option<u64>) -> KvStoreResult<CounterResult> {
        self.backend
            .decrement(key, delta, initial)
            .await
    }

    /// Applies `f` with optimistic concurrency. See [`CasExecutor::mutate`].
    pub async fn mutate_with_cas<T, F>(&self, key: &str, policy: RetryPolicy, f: F) -> KvStoreResult<MutationOutcome>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(T) -> T + Send,
    {
        CasExecutor::new(&self.backend, policy)
            .mutate(key, f)
            .await
    }

    /// Applies `f` and overwrites the document without any CAS check.
    pub async fn mutate_without_cas<T, F>(&self, key: &str, f: F) -> KvStoreResult<Cas>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(T) -> T,
    {
        update_without_cas(&self.backend, key, f).await
    }
}
