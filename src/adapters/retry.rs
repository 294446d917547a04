//! Retry and timeout decoration for adapters.
//!
//! `Retrying<A>` wraps either adapter and retries transient failures with
//! capped exponential backoff. Each individual call is bounded by a timeout.
//! The orchestrator never retries on its own.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{FilterCriteria, LimsRecord, RecordFields, RecordType, SourceObject};

use super::{CandidateStream, LimsError, LimsStore, MetadataSource, SourceError};

/// Retry policy for adapter calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Errors that know whether they are worth retrying
trait Retryable: std::fmt::Display {
    fn transient(&self) -> bool;
    fn timed_out() -> Self;
}

impl Retryable for SourceError {
    fn transient(&self) -> bool {
        self.is_transient()
    }

    fn timed_out() -> Self {
        SourceError::Timeout
    }
}

impl Retryable for LimsError {
    fn transient(&self) -> bool {
        self.is_transient()
    }

    fn timed_out() -> Self {
        LimsError::Timeout
    }
}

/// Adapter decorated with retries and a per-call timeout
pub struct Retrying<A> {
    inner: A,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl<A> Retrying<A> {
    pub fn new(inner: A, policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            inner,
            policy,
            call_timeout,
        }
    }

    /// The wrapped adapter
    pub fn inner(&self) -> &A {
        &self.inner
    }

    async fn call<T, E, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let result = match tokio::time::timeout(self.call_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(E::timed_out()),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.transient() && self.policy.should_retry(attempt) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Adapter call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: MetadataSource> MetadataSource for Retrying<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list_candidates<'a>(
        &'a self,
        filter: &'a FilterCriteria,
    ) -> Result<CandidateStream<'a>, SourceError> {
        // Only opening the listing is retried; a half-consumed stream is not replayed
        self.call("list_candidates", || self.inner.list_candidates(filter))
            .await
    }

    async fn fetch_metadata(&self, external_id: &str) -> Result<SourceObject, SourceError> {
        self.call("fetch_metadata", || self.inner.fetch_metadata(external_id))
            .await
    }
}

#[async_trait]
impl<L: LimsStore> LimsStore for Retrying<L> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
        record_type: RecordType,
    ) -> Result<Option<LimsRecord>, LimsError> {
        self.call("find_by_external_id", || {
            self.inner.find_by_external_id(external_id, record_type)
        })
        .await
    }

    // A retried create that had already committed comes back as Conflict,
    // which the identity mapper resolves as a skip.
    async fn create(
        &self,
        record_type: RecordType,
        external_id: &str,
        fields: &RecordFields,
    ) -> Result<LimsRecord, LimsError> {
        self.call("create", || self.inner.create(record_type, external_id, fields))
            .await
    }
}
