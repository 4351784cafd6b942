//! Convenient re-exports of commonly used types from caslayer.
//!
//! ```ignore
//! use caslayer::prelude::*;
//! ```

pub use caslayer_core::{
    backend::{CounterResult, KvBackend, KvBackendBuilder},
    cas::Cas,
    collection::Collection,
    document::{DocumentExt, Versioned},
    error::{KvStoreError, KvStoreResult},
    retry::{Backoff, CasExecutor, MutationOutcome, RetryPolicy, try_update_without_cas, update_without_cas},
};

pub use crate::harness::{Counter, HarnessConfig, HarnessReport, LoadHarness, Phase, PhaseReport, WorkerFailure};
