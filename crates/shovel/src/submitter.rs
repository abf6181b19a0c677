//! 📤 The Bulk Submitter: one batch in, one outcome per document out.
//!
//! Three layers, each wrapping the last:
//! - [`BulkSubmitter::try_submit`]: one attempt. Sends the batch, enforces the per-attempt
//!   deadline, and reconciles the backend's per-item verdicts with the batch's documents.
//! - [`BulkSubmitter::submit`]: one attempt, never fails. A transport error becomes a
//!   `Transport` failure on every document of the batch.
//! - [`BulkSubmitter::submit_with_retry`]: attempts until the batch lands, the retry budget
//!   runs out, or somebody cancels. Backoff is exponential and capped.
//!
//! Only transport errors are retried, and only the ones that could come out differently
//! next time (see [`TransportError::is_retryable`]). A document the backend rejected was
//! looked at and refused; sending it again gets the same answer, just slower.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backends::Sink;
use crate::common::{Batch, ErrorKind, ItemStatus, Outcome};
use crate::errors::{PipelineError, TransportError};

/// 🔄 How stubborn to be about transport failures.
///
/// Total attempts per batch are `max_retries + 1`. The delay before retry `n` (0-based) is
/// `min(base_delay * 2^n, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, retry: u32) -> Duration {
        // -- 📈 checked math all the way: 2^40 seconds of backoff is a cap, not a panic
        2u32.checked_pow(retry)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// 🏁 How a retried submission ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// ✅ the backend answered; outcomes hold its per-document verdicts
    Delivered,
    /// 💀 every attempt failed in transit; the run should stop
    Exhausted(PipelineError),
    /// 🛑 cancelled between attempts; outcomes hold the last attempt's transport failures
    Abandoned,
}

/// 📋 Everything a retried submission has to say for itself.
#[derive(Debug, Clone)]
pub struct SubmissionReport {
    pub outcomes: Vec<Outcome>,
    pub attempts: u32,
    /// ⏳ the backoff slept before each retry, in order
    pub backoff_delays: Vec<Duration>,
    pub verdict: Verdict,
}

/// 📤 Sends batches to a shared [`Sink`]. Cheap to clone; one clone per in-flight task.
#[derive(Debug)]
pub struct BulkSubmitter<S> {
    sink: Arc<S>,
    policy: RetryPolicy,
    timeout: Duration,
}

// -- 🧬 hand-rolled so S itself doesn't have to be Clone, only the Arc does
impl<S> Clone for BulkSubmitter<S> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            policy: self.policy,
            timeout: self.timeout,
        }
    }
}

impl<S: Sink> BulkSubmitter<S> {
    pub fn new(sink: Arc<S>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            sink,
            policy,
            timeout,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 🎯 One attempt. Per-document outcomes on success, a [`TransportError`] when the
    /// request failed as a whole or its answer can't be matched back to the batch.
    pub async fn try_submit(&self, batch: &Batch) -> Result<Vec<Outcome>, TransportError> {
        let statuses = match tokio::time::timeout(self.timeout, self.sink.bulk(batch)).await {
            Ok(result) => result?,
            Err(_elapsed) => return Err(TransportError::Timeout(self.timeout)),
        };

        if statuses.len() != batch.len() {
            return Err(TransportError::ItemCountMismatch {
                expected: batch.len(),
                returned: statuses.len(),
            });
        }

        Ok(batch
            .document_refs()
            .zip(statuses)
            .map(|(document_ref, status)| match status {
                ItemStatus::Accepted { .. } => Outcome::success(document_ref.clone()),
                ItemStatus::Rejected { status, reason } => {
                    warn!("🙅 document {} rejected with {}: {}", document_ref, status, reason);
                    Outcome::failure(
                        document_ref.clone(),
                        ErrorKind::DocumentRejected,
                        format!("{}: {}", status, reason),
                    )
                }
            })
            .collect())
    }

    /// 📦 One attempt that always comes back with `batch.len()` outcomes.
    pub async fn submit(&self, batch: &Batch) -> Vec<Outcome> {
        match self.try_submit(batch).await {
            Ok(outcomes) => outcomes,
            Err(error) => transport_failures(batch, &error),
        }
    }

    /// 🔄 Attempt, back off, attempt again, until delivered, exhausted, or cancelled.
    ///
    /// Cancellation is checked before each backoff and interrupts the sleep itself. An
    /// attempt already on the wire is allowed to finish.
    pub async fn submit_with_retry(
        &self,
        batch: &Batch,
        cancel: &CancellationToken,
    ) -> SubmissionReport {
        let mut backoff_delays = Vec::new();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let error = match self.try_submit(batch).await {
                Ok(outcomes) => {
                    debug!("📬 batch #{} delivered after {} attempt(s)", batch.sequence, attempts);
                    return SubmissionReport {
                        outcomes,
                        attempts,
                        backoff_delays,
                        verdict: Verdict::Delivered,
                    };
                }
                Err(error) => error,
            };

            let retries_used = attempts - 1;
            if retries_used >= self.policy.max_retries || !error.is_retryable() {
                warn!(
                    "💀 batch #{} gave up after {} attempt(s): {}",
                    batch.sequence, attempts, error
                );
                return SubmissionReport {
                    outcomes: transport_failures(batch, &error),
                    attempts,
                    backoff_delays,
                    verdict: Verdict::Exhausted(PipelineError::RetriesExhausted {
                        attempts,
                        last: error,
                    }),
                };
            }

            if cancel.is_cancelled() {
                return abandoned(batch, &error, attempts, backoff_delays);
            }

            let delay = self.policy.delay_for(retries_used);
            warn!(
                "🔄 batch #{} attempt {} failed ({}), retrying in {:?}",
                batch.sequence, attempts, error, delay
            );
            backoff_delays.push(delay);

            tokio::select! {
                _ = cancel.cancelled() => {
                    return abandoned(batch, &error, attempts, backoff_delays);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn transport_failures(batch: &Batch, error: &TransportError) -> Vec<Outcome> {
    let message = error.to_string();
    batch
        .document_refs()
        .map(|document_ref| Outcome::failure(document_ref.clone(), ErrorKind::Transport, message.clone()))
        .collect()
}

fn abandoned(
    batch: &Batch,
    error: &TransportError,
    attempts: u32,
    backoff_delays: Vec<Duration>,
) -> SubmissionReport {
    debug!("🛑 batch #{} abandoned after {} attempt(s), run is cancelling", batch.sequence, attempts);
    SubmissionReport {
        outcomes: transport_failures(batch, error),
        attempts,
        backoff_delays,
        verdict: Verdict::Abandoned,
    }
}
