//! Optimistic updates through compare-and-swap with a bounded retry budget.
//!
//! [`CasExecutor`] applies a mutation function to the current value of a document and
//! writes the result back conditionally on the CAS it read. If another writer got there
//! first the store rejects the write with a CAS mismatch, and the executor starts over
//! from a fresh read. Only CAS mismatches are retried: a missing document, a transport
//! fault or a failing mutation function ends the call immediately.
//!
//! Each attempt is a complete read-mutate-write cycle, so dropping the returned future
//! between attempts never leaves a half-applied update behind.
//!
//! [`update_without_cas`] is the unconditional counterpart. It exists to show, and to
//! test, the lost updates that happen when concurrent writers skip the CAS check.
//!
//! # Example
//!
//! ```ignore
//! use caslayer::retry::{CasExecutor, RetryPolicy};
//!
//! let executor = CasExecutor::new(&backend, RetryPolicy::default());
//! let outcome = executor
//!     .mutate("ctr", |mut counter: Counter| {
//!         counter.number += 1;
//!         counter
//!     })
//!     .await?;
//! println!("committed {} after {} attempt(s)", outcome.cas, outcome.attempts);
//! ```

use bson::Bson;
use rand::Rng;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{
    backend::KvBackend,
    cas::Cas,
    document::DocumentExt,
    error::{KvStoreError, KvStoreResult},
};

/// Delay inserted between a CAS mismatch and the next attempt.
///
/// The delay before retry `n` (0-based) is drawn uniformly from
/// `0..=min(max_delay_ms, base_delay_ms * 2^n)`. The randomness spreads competing writers
/// apart so that the same one does not win every race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay_ms: 1,
            max_delay_ms: 50,
        }
    }
}

impl Backoff {
    /// Retry immediately after a mismatch.
    pub const fn none() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Upper bound of the delay before retry `retry_index` (0-based).
    pub fn cap(&self, retry_index: u32) -> Duration {
        let factor = 1u64.checked_shl(retry_index).unwrap_or(u64::MAX);

        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }

    /// Draws the delay before retry `retry_index`.
    pub fn delay(&self, retry_index: u32) -> Duration {
        let cap = self.cap(retry_index);
        if cap.is_zero() {
            return Duration::ZERO;
        }

        let micros = u64::try_from(cap.as_micros()).unwrap_or(u64::MAX);
        Duration::from_micros(rand::thread_rng().gen_range(0..=micros))
    }
}

/// How many times a CAS update may be attempted, and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of read-mutate-write attempts, including the first one.
    ///
    /// The first attempt is always made, so `0` behaves like `1`.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// The number of attempts a call may actually make.
    pub fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Result of a committed CAS update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationOutcome {
    /// CAS issued by the store for the committed write.
    pub cas: Cas,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Runs get, mutate and conditional replace against a backend, retrying on CAS conflicts.
///
/// The executor holds no mutable state of its own. Concurrent calls, on the same or on
/// different executors, are safe: correctness rests entirely on the store rejecting
/// writes that present a stale CAS.
#[derive(Debug, Clone)]
pub struct CasExecutor<B: KvBackend> {
    backend: B,
    policy: RetryPolicy,
}

impl<B: KvBackend> CasExecutor<B> {
    pub fn new(backend: B, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Applies `f` to the stored BSON value of `key` and commits the result with CAS.
    ///
    /// `f` may run once per attempt, each time on a freshly read value.
    ///
    /// # Errors
    ///
    /// - `DocumentNotFound` if the key does not exist, without retrying.
    /// - `RetryExhausted` once every attempt in the budget ended in a CAS mismatch.
    /// - Any other error from the backend or from `f`, unchanged and without retrying.
    pub async fn mutate_raw<F>(&self, key: &str, mut f: F) -> KvStoreResult<MutationOutcome>
    where
        F: FnMut(Bson) -> KvStoreResult<Bson> + Send,
    {
        let budget = self.policy.attempt_budget();
        let mut attempts = 0;

        loop {
            attempts += 1;

            let current = self.backend.get(key).await?;
            let updated = f(current.value)?;

            match self
                .backend
                .replace(key, updated, Some(current.cas))
                .await
            {
                Ok(cas) => {
                    debug!(key, attempts, %cas, "CAS update committed");
                    return Ok(MutationOutcome { cas, attempts });
                }
                Err(err) if err.is_cas_mismatch() => {
                    if attempts >= budget {
                        warn!(key, attempts, "CAS retry budget exhausted");
                        return Err(KvStoreError::RetryExhausted {
                            key: key.to_string(),
                            attempts,
                        });
                    }

                    let delay = self.policy.backoff.delay(attempts - 1);
                    debug!(
                        key,
                        attempt = attempts,
                        remaining = budget - attempts,
                        ?delay,
                        "CAS mismatch, retrying"
                    );

                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => {
                    debug!(key, attempts, error = %err, "CAS update failed");
                    return Err(err);
                }
            }
        }
    }

    /// Typed form of [`CasExecutor::mutate_raw`] for infallible mutations.
    pub async fn mutate<T, F>(&self, key: &str, mut f: F) -> KvStoreResult<MutationOutcome>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(T) -> T + Send,
    {
        self.try_mutate(key, move |value: T| Ok(f(value)))
            .await
    }

    /// Typed form of [`CasExecutor::mutate_raw`] whose mutation may reject the value.
    pub async fn try_mutate<T, F>(&self, key: &str, mut f: F) -> KvStoreResult<MutationOutcome>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(T) -> KvStoreResult<T> + Send,
    {
        self.mutate_raw(key, |bson| f(T::from_bson(bson)?)?.to_bson())
            .await
    }
}

/// Reads `key`, applies `f` and writes the result back unconditionally.
///
/// Concurrent callers overwrite each other's results: an update computed from a value
/// that was replaced in the meantime silently discards that replacement.
pub async fn update_without_cas<B, T, F>(backend: &B, key: &str, f: F) -> KvStoreResult<Cas>
where
    B: KvBackend + ?Sized,
    T: Serialize + DeserializeOwned,
    F: FnOnce(T) -> T,
{
    try_update_without_cas(backend, key, move |value: T| Ok(f(value))).await
}

/// Form of [`update_without_cas`] whose update may reject the value. Nothing is written
/// when `f` fails.
pub async fn try_update_without_cas<B, T, F>(backend: &B, key: &str, f: F) -> KvStoreResult<Cas>
where
    B: KvBackend + ?Sized,
    T: Serialize + DeserializeOwned,
    F: FnOnce(T) -> KvStoreResult<T>,
{
    let current = backend.get(key).await?.content_as::<T>()?;
    let updated = f(current.value)?.to_bson()?;

    backend.upsert(key, updated).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::CounterResult, document::Versioned};
    use async_trait::async_trait;
    use bson::doc;
    use std::sync::Mutex;

    /// Single-document backend that can be told to reject the next few replaces.
    #[derive(Debug, Default)]
    struct ScriptedBackend {
        state: Mutex<Scripted>,
    }

    #[derive(Debug, Default)]
    struct Scripted {
        document: Option<(Bson, u64)>,
        conflicts: u32,
        transport_failure: bool,
        gets: u32,
        replaces: u32,
        writes: u32,
    }

    impl ScriptedBackend {
        fn with_number(number: i64) -> Self {
            let backend = Self::default();
            backend.state.lock().unwrap().document = Some((Bson::Document(doc! { "Number": number }), 1));
            backend
        }

        fn conflicts(self, conflicts: u32) -> Self {
            self.state.lock().unwrap().conflicts = conflicts;
            self
        }

        fn failing_transport(self) -> Self {
            self.state.lock().unwrap().transport_failure = true;
            self
        }

        fn number(&self) -> i64 {
            let state = self.state.lock().unwrap();
            let (value, _) = state.document.as_ref().unwrap();
            value.as_document().unwrap().get_i64("Number").unwrap()
        }

        fn counts(&self) -> (u32, u32, u32) {
            let state = self.state.lock().unwrap();
            (state.gets, state.replaces, state.writes)
        }
    }

    #[async_trait]
    impl KvBackend for ScriptedBackend {
        async fn get(&self, key: &str) -> KvStoreResult<Versioned<Bson>> {
            let mut state = self.state.lock().unwrap();
            state.gets += 1;

            match &state.document {
                Some((value, cas)) => Ok(Versioned::new(value.clone(), Cas::new(*cas))),
                None => Err(KvStoreError::DocumentNotFound(key.to_string())),
            }
        }

        async fn insert(&self, _key: &str, _value: Bson) -> KvStoreResult<Cas> {
            Err(KvStoreError::Backend("unsupported".to_string()))
        }

        async fn upsert(&self, _key: &str, value: Bson) -> KvStoreResult<Cas> {
            let mut state = self.state.lock().unwrap();
            let cas = state.document.as_ref().map_or(1, |(_, cas)| cas + 1);
            state.document = Some((value, cas));
            state.writes += 1;
            Ok(Cas::new(cas))
        }

        async fn replace(&self, key: &str, value: Bson, expected: Option<Cas>) -> KvStoreResult<Cas> {
            let mut state = self.state.lock().unwrap();
            state.replaces += 1;

            if state.transport_failure {
                return Err(KvStoreError::Transport("connection reset".to_string()));
            }

            let current = state.document.as_ref().map(|(_, cas)| *cas).unwrap_or_default();
            if state.conflicts > 0 {
                // Another writer slipped in between our read and this write.
                state.conflicts -= 1;
                if let Some((_, cas)) = state.document.as_mut() {
                    *cas += 1;
                }
                return Err(KvStoreError::CasMismatch {
                    key: key.to_string(),
                    expected: expected.unwrap_or_default(),
                    actual: Cas::new(current + 1),
                });
            }

            if let Some(expected) = expected {
                if expected != Cas::new(current) {
                    return Err(KvStoreError::CasMismatch {
                        key: key.to_string(),
                        expected,
                        actual: Cas::new(current),
                    });
                }
            }

            state.document = Some((value, current + 1));
            state.writes += 1;
            Ok(Cas::new(current + 1))
        }

        async fn remove(&self, _key: &str, _expected: Option<Cas>) -> KvStoreResult<()> {
            Err(KvStoreError::Backend("unsupported".to_string()))
        }

        async fn increment(&self, _key: &str, _delta: u64, _initial: Option<u64>) -> KvStoreResult<CounterResult> {
            Err(KvStoreError::Backend("unsupported".to_string()))
        }

        async fn decrement(&self, _key: &str, _delta: u64, _initial: Option<u64>) -> KvStoreResult<CounterResult> {
            Err(KvStoreError::Backend("unsupported".to_string()))
        }

        async fn upsert_with_expiry(&self, _key: &str, _value: Bson, _expiry: Duration) -> KvStoreResult<Cas> {
            Err(KvStoreError::Backend("unsupported".to_string()))
        }

        async fn touch(&self, _key: &str, _expiry: Duration) -> KvStoreResult<Cas> {
            Err(KvStoreError::Backend("unsupported".to_string()))
        }

        async fn get_and_touch(&self, _key: &str, _expiry: Duration) -> KvStoreResult<Versioned<Bson>> {
            Err(KvStoreError::Backend("unsupported".to_string()))
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Counter {
        #[serde(rename = "Number")]
        number: i64,
    }

    fn increment(mut counter: Counter) -> Counter {
        counter.number += 1;
        counter
    }

    fn immediate(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts).with_backoff(Backoff::none())
    }

    #[test]
    fn backoff_cap_doubles_until_max() {
        let backoff = Backoff { base_delay_ms: 2, max_delay_ms: 10 };

        assert_eq!(backoff.cap(0), Duration::from_millis(2));
        assert_eq!(backoff.cap(1), Duration::from_millis(4));
        assert_eq!(backoff.cap(2), Duration::from_millis(8));
        assert_eq!(backoff.cap(3), Duration::from_millis(10));
        assert_eq!(backoff.cap(200), Duration::from_millis(10));
    }

    #[test]
    fn backoff_delay_stays_under_cap() {
        let backoff = Backoff::default();
        for retry in 0..10 {
            assert!(backoff.delay(retry) <= backoff.cap(retry));
        }
        assert_eq!(Backoff::none().delay(3), Duration::ZERO);
    }

    #[test]
    fn zero_budget_still_allows_one_attempt() {
        assert_eq!(RetryPolicy::new(0).attempt_budget(), 1);
        assert_eq!(RetryPolicy::new(7).attempt_budget(), 7);
    }

    #[test]
    fn policy_fills_missing_fields_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{ "max_attempts": 5 }"#).unwrap();

        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff, Backoff::default());
    }

    #[tokio::test]
    async fn commits_on_first_attempt_without_contention() {
        let backend = ScriptedBackend::with_number(0);
        let executor = CasExecutor::new(&backend, immediate(3));

        let outcome = executor.mutate("ctr", increment).await.unwrap();

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.cas, Cas::new(2));
        assert_eq!(backend.number(), 1);
        assert_eq!(backend.counts(), (1, 1, 1));
    }

    #[tokio::test]
    async fn retries_through_conflicts() {
        let backend = ScriptedBackend::with_number(10).conflicts(3);
        let executor = CasExecutor::new(&backend, immediate(5));

        let outcome = executor.mutate("ctr", increment).await.unwrap();

        assert_eq!(outcome.attempts, 4);
        assert_eq!(backend.number(), 11);
        assert_eq!(backend.counts(), (4, 4, 1));
    }

    #[tokio::test]
    async fn gives_up_after_budget_without_writing() {
        let backend = ScriptedBackend::with_number(0).conflicts(10);
        let executor = CasExecutor::new(&backend, immediate(3));

        let err = executor.mutate("ctr", increment).await.unwrap_err();

        assert_eq!(err, KvStoreError::RetryExhausted { key: "ctr".to_string(), attempts: 3 });
        assert_eq!(backend.number(), 0);
        assert_eq!(backend.counts(), (3, 3, 0));
    }

    #[tokio::test]
    async fn missing_document_is_not_retried() {
        let backend = ScriptedBackend::default();
        let executor = CasExecutor::new(&backend, immediate(100));

        let err = executor.mutate("ctr", increment).await.unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(backend.counts(), (1, 0, 0));
    }

    #[tokio::test]
    async fn transport_errors_are_not_retried() {
        let backend = ScriptedBackend::with_number(0).failing_transport();
        let executor = CasExecutor::new(&backend, immediate(100));

        let err = executor.mutate("ctr", increment).await.unwrap_err();

        assert!(matches!(err, KvStoreError::Transport(_)));
        assert_eq!(backend.counts(), (1, 1, 0));
    }

    #[tokio::test]
    async fn rejected_mutation_stops_the_loop() {
        let backend = ScriptedBackend::with_number(0);
        let executor = CasExecutor::new(&backend, immediate(100));

        let err = executor
            .try_mutate("ctr", |_: Counter| Err(KvStoreError::InvalidDocument("frozen".to_string())))
            .await
            .unwrap_err();

        assert_eq!(err, KvStoreError::InvalidDocument("frozen".to_string()));
        assert_eq!(backend.counts(), (1, 0, 0));
    }

    #[tokio::test]
    async fn mutation_sees_the_latest_value_on_each_attempt() {
        let backend = ScriptedBackend::with_number(5).conflicts(2);
        let executor = CasExecutor::new(&backend, immediate(5));
        let mut seen = Vec::new();

        executor
            .mutate("ctr", |counter: Counter| {
                seen.push(counter.number);
                increment(counter)
            })
            .await
            .unwrap();

        assert_eq!(seen, vec![5, 5, 5]);
        assert_eq!(backend.number(), 6);
    }

    #[tokio::test]
    async fn unconditional_update_overwrites() {
        let backend = ScriptedBackend::with_number(41);

        let cas = update_without_cas(&backend, "ctr", increment).await.unwrap();

        assert_eq!(cas, Cas::new(2));
        assert_eq!(backend.number(), 42);
        assert_eq!(backend.counts(), (1, 0, 1));
    }

    #[tokio::test]
    async fn rejected_unconditional_update_writes_nothing() {
        let backend = ScriptedBackend::with_number(41);

        let err = try_update_without_cas(&backend, "ctr", |_: Counter| {
            Err(KvStoreError::InvalidDocument("frozen".to_string()))
        })
        .await
        .unwrap_err();

        assert_eq!(err, KvStoreError::InvalidDocument("frozen".to_string()));
        assert_eq!(backend.number(), 41);
        assert_eq!(backend.counts(), (1, 0, 0));
    }
}
