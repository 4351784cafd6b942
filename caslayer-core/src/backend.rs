//! Key-value backend abstraction.
//!
//! This module defines the trait that abstracts over the store holding the documents, so
//! that the CAS retry executor and the load harness can run against any implementation
//! (in-memory, a remote cluster client, a test double) passed in explicitly by the caller.
//!
//! # Overview
//!
//! [`KvBackend`] is a minimal async interface: reads return the value together with its
//! [`Cas`], writes return the fresh [`Cas`] issued by the store, and conditional writes
//! reject a stale [`Cas`] with [`KvStoreError::CasMismatch`](crate::error::KvStoreError::CasMismatch).
//!
//! Documents may carry an expiry. An expired document is gone: every operation treats it
//! exactly like a key that was never written. An expiry of [`Duration::ZERO`] means the
//! document never expires.
//!
//! # Examples
//!
//! ```ignore
//! use caslayer::backend::KvBackend;
//! use bson::{Bson, doc};
//!
//! let backend = MyBackendImpl::new();
//!
//! let cas = backend.upsert("ctr", Bson::Document(doc! { "Number": 0_i64 })).await?;
//! let current = backend.get("ctr").await?;
//! assert_eq!(current.cas, cas);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::Bson;
use std::{fmt::Debug, sync::Arc, time::Duration};

use crate::{cas::Cas, document::Versioned, error::KvStoreResult};

/// Result of a counter operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterResult {
    /// The counter value after the operation.
    pub value: u64,
    /// The CAS issued for the write.
    pub cas: Cas,
}

/// Abstract interface for key-value document stores.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. Conditional writes must be linearizable with respect to the CAS: a write
/// presenting a CAS succeeds only if no other write to that key happened since the CAS
/// was issued.
///
/// # Error Handling
///
/// Operations return [`KvStoreResult<T>`](crate::error::KvStoreResult). Network or
/// transport faults should be reported as
/// [`KvStoreError::Transport`](crate::error::KvStoreError::Transport) so that callers can
/// tell them apart from CAS conflicts.
#[async_trait]
pub trait KvBackend: Send + Sync + Debug {
    /// Reads a document and the CAS of its current version.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` if the key does not exist.
    async fn get(&self, key: &str) -> KvStoreResult<Versioned<Bson>>;

    /// Creates a document, failing if the key already exists.
    ///
    /// # Errors
    ///
    /// Returns `DocumentAlreadyExists` if the key exists.
    async fn insert(&self, key: &str, value: Bson) -> KvStoreResult<Cas>;

    /// Writes a document unconditionally, creating it if needed.
    ///
    /// Plain writes (`insert`, `upsert`, `replace`) leave the document without an expiry.
    async fn upsert(&self, key: &str, value: Bson) -> KvStoreResult<Cas>;

    /// Writes a document unconditionally and lets it expire after `expiry`.
    async fn upsert_with_expiry(&self, key: &str, value: Bson, expiry: Duration) -> KvStoreResult<Cas>;

    /// Replaces an existing document.
    ///
    /// When `expected` is `Some`, the write is only applied if the document's current CAS
    /// equals it. When `None`, the write is unconditional but the document must exist.
    ///
    /// # Errors
    ///
    /// Returns `CasMismatch` if `expected` is stale and `DocumentNotFound` if the key does
    /// not exist. Neither case modifies the document.
    async fn replace(&self, key: &str, value: Bson, expected: Option<Cas>) -> KvStoreResult<Cas>;

    /// Removes a document, optionally guarded by a CAS.
    ///
    /// # Errors
    ///
    /// Returns `CasMismatch` if `expected` is stale and `DocumentNotFound` if the key does
    /// not exist.
    async fn remove(&self, key: &str, expected: Option<Cas>) -> KvStoreResult<()>;

    /// Adds `delta` to a numeric counter document.
    ///
    /// If the document does not exist and `initial` is given, it is created with the
    /// `initial` value and `delta` is ignored.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` if the key does not exist and no `initial` is given, and
    /// `InvalidDocument` if the stored value is not a non-negative integer.
    async fn increment(&self, key: &str, delta: u64, initial: Option<u64>) -> KvStoreResult<CounterResult>;

    /// Subtracts `delta` from a numeric counter document, never going below zero.
    ///
    /// Creation semantics are the same as [`KvBackend::increment`].
    async fn decrement(&self, key: &str, delta: u64, initial: Option<u64>) -> KvStoreResult<CounterResult>;

    /// Resets the expiry of an existing document to `expiry` from now.
    ///
    /// Touching is a write: the document gets a new CAS, so any CAS read before the touch
    /// is stale afterwards.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` if the key does not exist or has expired.
    async fn touch(&self, key: &str, expiry: Duration) -> KvStoreResult<Cas>;

    /// Reads a document and resets its expiry in one step.
    ///
    /// The returned CAS is the one issued by the touch.
    async fn get_and_touch(&self, key: &str, expiry: Duration) -> KvStoreResult<Versioned<Bson>>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op, but backends with external connections
    /// should override this.
    async fn shutdown(self) -> KvStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> KvBackend for &B
where
    B: KvBackend,
{
    async fn get(&self, key: &str) -> KvStoreResult<Versioned<Bson>> {
        (*self).get(key).await
    }

    async fn insert(&self, key: &str, value: Bson) -> KvStoreResult<Cas> {
        (*self).insert(key, value).await
    }

    async fn upsert(&self, key: &str, value: Bson) -> KvStoreResult<Cas> {
        (*self).upsert(key, value).await
    }

    async fn upsert_with_expiry(&self, key: &str, value: Bson, expiry: Duration) -> KvStoreResult<Cas> {
        (*self)
            .upsert_with_expiry(key, value, expiry)
            .await
    }

    async fn replace(&self, key: &str, value: Bson, expected: Option<Cas>) -> KvStoreResult<Cas> {
        (*self)
            .replace(key, value, expected)
            .await
    }

    async fn remove(&self, key: &str, expected: Option<Cas>) -> KvStoreResult<()> {
        (*self).remove(key, expected).await
    }

    async fn increment(&self, key: &str, delta: u64, initial: Option<u64>) -> KvStoreResult<CounterResult> {
        (*self)
            .increment(key, delta, initial)
            .await
    }

    async fn decrement(&self, key: &str, delta: u64, initial: Option<u64>) -> KvStoreResult<CounterResult> {
        (*self)
            .decrement(key, delta, initial)
            .await
    }

    async fn touch(&self, key: &str, expiry: Duration) -> KvStoreResult<Cas> {
        (*self).touch(key, expiry).await
    }

    async fn get_and_touch(&self, key: &str, expiry: Duration) -> KvStoreResult<Versioned<Bson>> {
        (*self).get_and_touch(key, expiry).await
    }
}

#[async_trait]
impl<B> KvBackend for Arc<B>
where
    B: KvBackend,
{
    async fn get(&self, key: &str) -> KvStoreResult<Versioned<Bson>> {
        (**self).get(key).await
    }

    async fn insert(&self, key: &str, value: Bson) -> KvStoreResult<Cas> {
        (**self).insert(key, value).await
    }

    async fn upsert(&self, key: &str, value: Bson) -> KvStoreResult<Cas> {
        (**self).upsert(key, value).await
    }

    async fn upsert_with_expiry(&self, key: &str, value: Bson, expiry: Duration) -> KvStoreResult<Cas> {
        (**self)
            .upsert_with_expiry(key, value, expiry)
            .await
    }

    async fn replace(&self, key: &str, value: Bson, expected: Option<Cas>) -> KvStoreResult<Cas> {
        (**self)
            .replace(key, value, expected)
            .await
    }

    async fn remove(&self, key: &str, expected: Option<Cas>) -> KvStoreResult<()> {
        (**self).remove(key, expected).await
    }

    async fn increment(&self, key: &str, delta: u64, initial: Option<u64>) -> KvStoreResult<CounterResult> {
        (**self)
            .increment(key, delta, initial)
            .await
    }

    async fn decrement(&self, key: &str, delta: u64, initial: Option<u64>) -> KvStoreResult<CounterResult> {
        (**self)
            .decrement(key, delta, initial)
            .await
    }

    async fn touch(&self, key: &str, expiry: Duration) -> KvStoreResult<Cas> {
        (**self).touch(key, expiry).await
    }

    async fn get_and_touch(&self, key: &str, expiry: Duration) -> KvStoreResult<Versioned<Bson>> {
        (**self).get_and_touch(key, expiry).await
    }
}

/// Factory for backend instances.
#[async_trait]
pub trait KvBackendBuilder {
    type Backend: KvBackend;

    async fn build(self) -> KvStoreResult<Self::Backend>;
}
