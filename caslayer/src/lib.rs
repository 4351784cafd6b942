//! Optimistic concurrency for key-value document stores.
//!
//! This crate is the primary entry point of the caslayer workspace. It re-exports the core
//! types, the in-memory backend, and adds the concurrent load harness used to compare
//! unconditional updates with CAS-guarded ones.
//!
//! # Features
//!
//! - **CAS retry executor** - Get, mutate and conditional replace, retried only on CAS conflicts
//! - **Pluggable backends** - Any store implementing [`backend::KvBackend`], passed in explicitly
//! - **Typed documents** - Plain serde structs, stored as BSON
//! - **Load harness** - Many concurrent workers incrementing one counter, with and without CAS
//!
//! # Quick Start
//!
//! ```ignore
//! use caslayer::{prelude::*, memory::InMemoryStore};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Data {
//!     #[serde(rename = "Number")]
//!     pub number: i64,
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryStore::builder().build().await.unwrap();
//!     let executor = CasExecutor::new(&store, RetryPolicy::default());
//!
//!     Collection::new(&store)
//!         .upsert("ctr", &Data { number: 0 })
//!         .await
//!         .unwrap();
//!
//!     let outcome = executor
//!         .mutate("ctr", |mut data: Data| {
//!             data.number += 1;
//!             data
//!         })
//!         .await
//!         .unwrap();
//!
//!     println!("committed {} after {} attempt(s)", outcome.cas, outcome.attempts);
//! }
//! ```
//!
//! # Load Harness
//!
//! ```ignore
//! use caslayer::{harness::{HarnessConfig, LoadHarness}, memory::InMemoryStore};
//! use std::{sync::Arc, time::Duration};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryStore::builder()
//!         .latency(Duration::from_millis(1))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let harness = LoadHarness::new(Arc::new(store), HarnessConfig::default()).unwrap();
//!     let report = harness.run().await.unwrap();
//!
//!     // Typically below 1000: concurrent workers overwrite each other.
//!     println!("{}", report.without_cas);
//!     // Always exactly 1000.
//!     println!("{}", report.with_cas);
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage with CAS semantics for development and testing

pub mod config;
pub mod harness;
pub mod prelude;

pub use caslayer_core::{backend, cas, collection, document, error, retry};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use caslayer_memory::{InMemoryStore, InMemoryStoreBuilder};
}
