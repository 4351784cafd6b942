//! Concurrent load harness for optimistic updates.
//!
//! The harness seeds a counter document and has many tokio tasks increment it at once,
//! first with plain read-modify-write cycles and then through the [`CasExecutor`]. The
//! first phase loses updates whenever two workers read the same value; the second one
//! must end on exactly `initial_value + worker_count * increments_per_worker`.
//!
//! # Example
//!
//! ```ignore
//! use caslayer::{harness::{HarnessConfig, LoadHarness}, memory::InMemoryStore};
//! use std::{sync::Arc, time::Duration};
//!
//! let store = InMemoryStore::builder().latency(Duration::from_millis(1)).build().await?;
//! let harness = LoadHarness::new(Arc::new(store), HarnessConfig::default())?;
//! let report = harness.run().await?;
//!
//! println!("{}", report.without_cas);
//! println!("{}", report.with_cas);
//! ```

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{info, warn};

use caslayer_core::{
    backend::KvBackend,
    collection::Collection,
    error::{KvStoreError, KvStoreResult},
    retry::{CasExecutor, RetryPolicy, try_update_without_cas},
};

/// The document every worker increments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    #[serde(rename = "Number")]
    pub number: i64,
}

impl Counter {
    pub fn new(number: i64) -> Self {
        Self { number }
    }

    /// The counter after one increment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDocument` if the stored number is already `i64::MAX`.
    pub fn try_incremented(self) -> KvStoreResult<Self> {
        self.number
            .checked_add(1)
            .map(Self::new)
            .ok_or_else(|| KvStoreError::InvalidDocument(format!("counter {} cannot be incremented", self.number)))
    }
}

/// Shape of a harness run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Number of concurrent workers.
    pub worker_count: usize,
    /// Increments each worker performs, one after the other.
    pub increments_per_worker: usize,
    /// Key of the counter document.
    pub key: String,
    /// Value the counter is seeded with before each phase.
    pub initial_value: i64,
    /// Budget for every single CAS increment.
    pub retry: RetryPolicy,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            increments_per_worker: 100,
            key: "ctr".to_string(),
            initial_value: 0,
            retry: RetryPolicy::default(),
        }
    }
}

impl HarnessConfig {
    /// Rejects configurations that cannot produce a meaningful run.
    ///
    /// The final counter value, `initial_value + worker_count * increments_per_worker`,
    /// must fit in an `i64`.
    pub fn validate(&self) -> KvStoreResult<()> {
        if self.worker_count == 0 {
            return Err(KvStoreError::InvalidConfig("worker_count must be at least 1".to_string()));
        }
        if self.key.is_empty() {
            return Err(KvStoreError::InvalidConfig("key must not be empty".to_string()));
        }
        if self.checked_total().is_none() {
            return Err(KvStoreError::InvalidConfig(format!(
                "initial_value {} plus {} x {} increments overflows the counter",
                self.initial_value, self.worker_count, self.increments_per_worker
            )));
        }

        Ok(())
    }

    /// The value the counter holds after a phase in which no update was lost.
    ///
    /// Saturates at `i64::MAX` for configurations that [`HarnessConfig::validate`] rejects.
    pub fn expected_total(&self) -> i64 {
        self.checked_total().unwrap_or(i64::MAX)
    }

    fn checked_total(&self) -> Option<i64> {
        let workers = i64::try_from(self.worker_count).ok()?;
        let increments = i64::try_from(self.increments_per_worker).ok()?;

        workers
            .checked_mul(increments)?
            .checked_add(self.initial_value)
    }
}

/// Which update strategy the workers use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Read, increment, upsert. No version check.
    WithoutCas,
    /// Read, increment, replace with the CAS that was read, retrying on mismatch.
    WithCas,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::WithoutCas => f.write_str("without CAS"),
            Phase::WithCas => f.write_str("with CAS"),
        }
    }
}

/// An error that stopped one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerFailure {
    pub worker: usize,
    pub error: KvStoreError,
}

/// Outcome of one phase.
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub phase: Phase,
    pub expected: i64,
    pub actual: i64,
    pub failures: Vec<WorkerFailure>,
    pub elapsed: Duration,
}

impl PhaseReport {
    /// Increments that did not make it into the final value.
    pub fn lost_updates(&self) -> i64 {
        self.expected - self.actual
    }

    /// `true` if every increment landed and no worker failed.
    pub fn is_consistent(&self) -> bool {
        self.failures.is_empty() && self.actual == self.expected
    }
}

impl fmt::Display for PhaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected number = {}, actual number = {}",
            self.phase, self.expected, self.actual
        )?;
        if !self.failures.is_empty() {
            write!(f, " ({} worker(s) failed)", self.failures.len())?;
        }

        Ok(())
    }
}

/// Reports of both phases of [`LoadHarness::run`].
#[derive(Debug, Clone)]
pub struct HarnessReport {
    pub without_cas: PhaseReport,
    pub with_cas: PhaseReport,
}

/// Drives concurrent increments of one counter document.
///
/// The backend is shared with the workers through an `Arc`; the harness itself keeps no
/// state between phases other than its configuration.
#[derive(Debug)]
pub struct LoadHarness<B: KvBackend + 'static> {
    backend: Arc<B>,
    config: HarnessConfig,
}

impl<B: KvBackend + 'static> LoadHarness<B> {
    /// Creates a harness after validating `config`.
    pub fn new(backend: Arc<B>, config: HarnessConfig) -> KvStoreResult<Self> {
        config.validate()?;

        Ok(Self { backend, config })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Runs the phase without CAS, then the phase with CAS.
    pub async fn run(&self) -> KvStoreResult<HarnessReport> {
        let without_cas = self.run_phase(Phase::WithoutCas).await?;
        let with_cas = self.run_phase(Phase::WithCas).await?;

        Ok(HarnessReport {
            without_cas,
            with_cas,
        })
    }

    /// Seeds the counter, runs every worker to completion and reads the final value.
    ///
    /// Worker errors do not abort the phase. They are collected in the report, next to
    /// the final value. Only failing to seed or to read back the counter is an error.
    pub async fn run_phase(&self, phase: Phase) -> KvStoreResult<PhaseReport> {
        let collection = Collection::new(self.backend.as_ref());
        let key = self.config.key.as_str();

        collection
            .upsert(key, &Counter::new(self.config.initial_value))
            .await?;

        info!(
            %phase,
            key,
            workers = self.config.worker_count,
            increments = self.config.increments_per_worker,
            "starting phase"
        );
        let started = Instant::now();

        let workers = (0..self.config.worker_count).map(|_| {
            tokio::spawn(run_worker(
                Arc::clone(&self.backend),
                self.config.key.clone(),
                phase,
                self.config.increments_per_worker,
                self.config.retry,
            ))
        });

        let mut failures = Vec::new();
        for (worker, result) in join_all(workers)
            .await
            .into_iter()
            .enumerate()
        {
            let error = match result {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error,
                Err(join_error) => KvStoreError::Unknown(format!("worker task did not complete: {join_error}")),
            };

            warn!(%phase, worker, %error, "worker failed");
            failures.push(WorkerFailure { worker, error });
        }

        let elapsed = started.elapsed();
        let actual = collection
            .get::<Counter>(key)
            .await?
            .value
            .number;

        let report = PhaseReport {
            phase,
            expected: self.config.expected_total(),
            actual,
            failures,
            elapsed,
        };

        info!(
            %phase,
            expected = report.expected,
            actual = report.actual,
            lost = report.lost_updates(),
            failed_workers = report.failures.len(),
            ?elapsed,
            "phase finished"
        );

        Ok(report)
    }
}

async fn run_worker<B: KvBackend>(
    backend: Arc<B>,
    key: String,
    phase: Phase,
    increments: usize,
    policy: RetryPolicy,
) -> KvStoreResult<()> {
    match phase {
        Phase::WithoutCas => {
            for _ in 0..increments {
                try_update_without_cas(backend.as_ref(), &key, Counter::try_incremented).await?;
            }
        }
        Phase::WithCas => {
            let executor = CasExecutor::new(backend.as_ref(), policy);
            for _ in 0..increments {
                executor
                    .try_mutate(&key, Counter::try_incremented)
                    .await?;
            }
        }
    }

    Ok(())
}
