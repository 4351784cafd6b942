//! In-memory key-value backend for caslayer.
//!
//! This crate provides a thread-safe, in-memory implementation of the `KvBackend` trait
//! with real compare-and-swap semantics. It is meant for development, tests and demos.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//! - **CAS per write** - Every successful write issues a fresh CAS token
//! - **Counters** - Increment and decrement with an initial value for missing documents
//! - **Simulated latency** - An optional delay per operation to model network round trips
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
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let collection = Collection::new(InMemoryStore::builder().build().await?);
//!
//!     collection.upsert("ctr", &Data { number: 0 }).await?;
//!     collection
//!         .mutate_with_cas("ctr", RetryPolicy::default(), |mut data: Data| {
//!             data.number += 1;
//!             data
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as caslayer_memory;

pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
