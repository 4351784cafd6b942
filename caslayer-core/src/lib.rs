//! Optimistic concurrency for key-value document stores.
//!
//! This crate is the core of the caslayer project and provides:
//!
//! - **CAS tokens** ([`cas`]) - Opaque version markers issued by the store on every write
//! - **Backend abstraction** ([`backend`]) - The key-value interface every store implements
//! - **Document conversion** ([`document`]) - Moving serde types in and out of stored BSON
//! - **Collections** ([`collection`]) - Typed access to the documents of a backend
//! - **CAS retry executor** ([`retry`]) - Get, mutate and conditional replace with bounded retry
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use caslayer::retry::{CasExecutor, RetryPolicy};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Counter {
//!     #[serde(rename = "Number")]
//!     pub number: i64,
//! }
//!
//! let executor = CasExecutor::new(&backend, RetryPolicy::default());
//! executor
//!     .mutate("ctr", |mut counter: Counter| {
//!         counter.number += 1;
//!         counter
//!     })
//!     .await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as caslayer_core;

pub mod backend;
pub mod cas;
pub mod collection;
pub mod document;
pub mod error;
pub mod retry;
