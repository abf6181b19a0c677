//! 🚜 The Pipeline Driver: pull, lift, project, batch, submit, record. Repeat until dry.
//!
//! ```text
//!   Source ──▶ lift _id/_index/_routing ──▶ FieldProjector ──▶ Batcher
//!                                                                 │ Batch
//!                                   ┌─────────────────────────────┘
//!                                   ▼
//!                      JoinSet of BulkSubmitter tasks (≤ max_in_flight)
//!                                   │ Vec<Outcome>
//!                                   ▼
//!                            ProgressTracker ──▶ watch channel ──▶ display
//! ```
//!
//! The driver is a single task. Source, projector, batcher and tracker all live on it, so
//! none of them need locks. Submission tasks only send their outcomes back.
//!
//! Backpressure is "don't pull while full": before every pull the driver waits until fewer
//! than `max_in_flight` submissions are outstanding. With the default of 1 that makes the
//! run strictly sequential.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize, Serializer};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backends::{Sink, Source};
use crate::batcher::Batcher;
use crate::common::{Batch, BulkAction, BulkItem, Document, DocumentRef, ErrorKind, Outcome, key_to_string};
use crate::errors::PipelineError;
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::projector::FieldProjector;
use crate::submitter::{BulkSubmitter, RetryPolicy, SubmissionReport, Verdict};

// ===== Config =====

/// 🔧 Everything the driver needs to know about a run.
///
/// Defaults follow the usual bulk-helper numbers: 500 documents or 100 MiB per request,
/// three retries starting at 2s and capped at 10 minutes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PipelineConfig {
    /// 🎯 destination index for documents that don't carry their own `_index`
    pub index_target: String,
    #[serde(default)]
    pub action: BulkAction,
    /// 🔑 document field whose value becomes the `_id`
    #[serde(default)]
    pub key_field: Option<String>,
    #[serde(default)]
    pub allowed_fields: Option<Vec<String>>,
    #[serde(default = "default_max_batch_count")]
    pub max_batch_count: usize,
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
}

fn default_max_batch_count() -> usize {
    500
}

fn default_max_batch_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_max_in_flight() -> usize {
    1
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    600_000
}

fn default_submit_timeout_ms() -> u64 {
    30_000
}

impl PipelineConfig {
    /// 🏗️ Defaults for everything except the one thing nobody can guess.
    pub fn new(index_target: impl Into<String>) -> Self {
        Self {
            index_target: index_target.into(),
            action: BulkAction::default(),
            key_field: None,
            allowed_fields: None,
            max_batch_count: default_max_batch_count(),
            max_batch_bytes: default_max_batch_bytes(),
            max_in_flight: default_max_in_flight(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            submit_timeout_ms: default_submit_timeout_ms(),
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let complaint = if self.index_target.trim().is_empty() {
            "index_target must name an index"
        } else if self.max_batch_count == 0 {
            "max_batch_count must be at least 1"
        } else if self.max_batch_bytes == 0 {
            "max_batch_bytes must be at least 1"
        } else if self.max_in_flight == 0 {
            "max_in_flight must be at least 1"
        } else if self.base_delay_ms > self.max_delay_ms {
            "base_delay_ms can't be larger than max_delay_ms"
        } else {
            return Ok(());
        };
        Err(PipelineError::InvalidConfig(complaint.to_string()))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }
}

// ===== State & summary =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// 🏁 How a run ended. The subset of [`PipelineState`] a finished run can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TerminalState {
    Completed,
    Failed,
    Cancelled,
}

impl From<TerminalState> for PipelineState {
    fn from(state: TerminalState) -> Self {
        match state {
            TerminalState::Completed => PipelineState::Completed,
            TerminalState::Failed => PipelineState::Failed,
            TerminalState::Cancelled => PipelineState::Cancelled,
        }
    }
}

impl std::fmt::Display for TerminalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TerminalState::Completed => "completed",
            TerminalState::Failed => "failed",
            TerminalState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// 📋 The end-of-run report.
///
/// `unsent` counts documents that were pulled but never reached the backend; they are
/// already included in `failed`. `retries` counts retry attempts across all batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub unsent: u64,
    pub batches: u64,
    pub retries: u64,
    pub terminal_state: TerminalState,
    #[serde(serialize_with = "error_as_text")]
    pub error: Option<PipelineError>,
}

fn error_as_text<S: Serializer>(error: &Option<PipelineError>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

// ===== Driver =====

/// 🛑 Why the driver stopped early.
enum Halt {
    Exhausted(PipelineError),
    Source(PipelineError),
    Panicked(PipelineError),
    Cancelled,
}

impl Halt {
    /// 🏷️ The kind stamped on documents left in the batcher when the run stops.
    fn unsent_kind(&self) -> ErrorKind {
        match self {
            Halt::Exhausted(_) | Halt::Panicked(_) => ErrorKind::RetriesExhausted,
            Halt::Source(_) => ErrorKind::Source,
            Halt::Cancelled => ErrorKind::Cancelled,
        }
    }

    fn into_parts(self) -> (TerminalState, Option<PipelineError>) {
        match self {
            Halt::Exhausted(error) | Halt::Source(error) | Halt::Panicked(error) => {
                (TerminalState::Failed, Some(error))
            }
            Halt::Cancelled => (TerminalState::Cancelled, None),
        }
    }
}

/// 📬 What a submission task hands back to the driver.
enum TaskReport {
    Finished(SubmissionReport),
    Panicked {
        document_refs: Vec<DocumentRef>,
        message: String,
    },
}

#[derive(Debug, Default)]
struct RunStats {
    batches: u64,
    retries: u64,
    unsent: u64,
}

/// 🚜 One run of documents from a [`Source`] into a [`Sink`].
///
/// Single use: sources don't rewind, so a second [`start`](Pipeline::start) is refused.
#[derive(Debug)]
pub struct Pipeline<Src, S> {
    source: Src,
    submitter: BulkSubmitter<S>,
    config: PipelineConfig,
    projector: FieldProjector,
    tracker: ProgressTracker,
    state: PipelineState,
    cancel: CancellationToken,
}

impl<Src, S> Pipeline<Src, S>
where
    Src: Source,
    S: Sink + 'static,
{
    pub fn new(source: Src, sink: Arc<S>, config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let submitter = BulkSubmitter::new(sink, config.retry_policy(), config.submit_timeout());
        let projector = FieldProjector::new(config.allowed_fields.clone());
        Ok(Self {
            source,
            submitter,
            config,
            projector,
            tracker: ProgressTracker::new(),
            state: PipelineState::Idle,
            cancel: CancellationToken::new(),
        })
    }

    /// 🛑 Use a caller-owned token, e.g. one already wired to Ctrl-C.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 📡 Live progress. The receiver sees the latest snapshot; intermediate ones may be skipped.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tracker.subscribe()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn size_hint(&self) -> Option<u64> {
        self.source.size_hint()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 🚀 Run until the source is dry, a batch exhausts its retries, the source fails, or
    /// the cancellation token fires.
    ///
    /// Fatal conditions land in the summary, not in the `Err`; `Err` is reserved for
    /// calling `start` twice. Every document pulled gets exactly one outcome either way.
    pub async fn start(&mut self) -> Result<RunSummary, PipelineError> {
        if self.state != PipelineState::Idle {
            return Err(PipelineError::AlreadyStarted);
        }
        self.state = PipelineState::Running;
        self.tracker.reset();
        info!(
            "🚜 pipeline running → index '{}' (batches of ≤{} docs, ≤{} in flight)",
            self.config.index_target, self.config.max_batch_count, self.config.max_in_flight
        );

        // -- 🧒 retry loops listen on a child token: cancelling the run stops them too,
        // -- and retry exhaustion can stop them without cancelling the run
        let retry_cancel = self.cancel.child_token();
        let mut batcher = Batcher::new(self.config.max_batch_count, self.config.max_batch_bytes);
        let mut in_flight: JoinSet<TaskReport> = JoinSet::new();
        let mut stats = RunStats::default();
        let mut halt: Option<Halt> = None;
        let mut position: u64 = 0;

        'pull: loop {
            while in_flight.len() >= self.config.max_in_flight {
                let Some(joined) = in_flight.join_next().await else {
                    break;
                };
                if let Some(stop) = self.absorb(joined, &mut stats, &retry_cancel) {
                    halt = Some(stop);
                    break 'pull;
                }
            }

            let pulled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("🛑 cancellation requested, no more pulls");
                    halt = Some(Halt::Cancelled);
                    break 'pull;
                }
                pulled = self.source.next_document() => pulled,
            };

            match pulled {
                Ok(Some(document)) => {
                    let item = self.prepare(position, document);
                    position += 1;
                    if let Some(batch) = batcher.push(item) {
                        self.dispatch(&mut in_flight, batch, &retry_cancel, &mut stats);
                    }
                }
                Ok(None) => {
                    debug!("🏜️ source ran dry after {} documents", position);
                    if let Some(batch) = batcher.flush() {
                        self.dispatch(&mut in_flight, batch, &retry_cancel, &mut stats);
                    }
                    break 'pull;
                }
                Err(source_error) => {
                    error!("💀 source failed after {} documents: {:#}", position, source_error);
                    halt = Some(Halt::Source(PipelineError::Source(format!("{:#}", source_error))));
                    break 'pull;
                }
            }
        }

        // -- 🚿 whatever is already on the wire gets to land and be counted
        while let Some(joined) = in_flight.join_next().await {
            if let Some(stop) = self.absorb(joined, &mut stats, &retry_cancel) {
                // -- 🥇 the first reason to stop is the one the summary reports
                if halt.is_none() {
                    halt = Some(stop);
                }
            }
        }

        if let Some(ref stop) = halt {
            if let Some(leftovers) = batcher.flush() {
                let kind = stop.unsent_kind();
                let outcomes: Vec<Outcome> = leftovers
                    .document_refs()
                    .map(|document_ref| {
                        Outcome::failure(document_ref.clone(), kind, "never sent, the run stopped first")
                    })
                    .collect();
                stats.unsent += outcomes.len() as u64;
                self.tracker.record(&outcomes);
            }
        }

        let (terminal_state, error) = match halt {
            Some(stop) => stop.into_parts(),
            None => (TerminalState::Completed, None),
        };
        self.state = terminal_state.into();

        let totals = self.tracker.finalize();
        info!("🏁 Indexed {}/{} documents", totals.succeeded, totals.attempted);
        if let Some(ref error) = error {
            warn!("💀 run ended {}: {}", terminal_state, error);
        } else {
            info!("🏁 run ended {}", terminal_state);
        }

        Ok(RunSummary {
            attempted: totals.attempted,
            succeeded: totals.succeeded,
            failed: totals.failed,
            unsent: stats.unsent,
            batches: stats.batches,
            retries: stats.retries,
            terminal_state,
            error,
        })
    }

    /// 🏷️ Lift bulk metadata out of the body, project what's left, and address it.
    ///
    /// `_id` beats the key field, `_index` beats `index_target`. The key field is read
    /// before projection, so it doesn't have to be an allowed field.
    fn prepare(&self, position: u64, mut document: Document) -> BulkItem {
        let explicit_id = document.remove("_id").filter(|value| !value.is_null());
        let explicit_index = document.remove("_index").filter(|value| !value.is_null());
        let routing = document
            .remove("_routing")
            .filter(|value| !value.is_null())
            .map(|value| key_to_string(&value));

        let key = match explicit_id {
            Some(id) => Some(key_to_string(&id)),
            None => self
                .config
                .key_field
                .as_deref()
                .and_then(|field| document.get(field))
                .filter(|value| !value.is_null())
                .map(key_to_string),
        };
        let index = explicit_index
            .map(|value| key_to_string(&value))
            .unwrap_or_else(|| self.config.index_target.clone());

        let body = self.projector.project(document);
        BulkItem::new(
            DocumentRef { position, key },
            self.config.action,
            index,
            routing,
            &body,
        )
    }

    fn dispatch(
        &self,
        in_flight: &mut JoinSet<TaskReport>,
        batch: Batch,
        retry_cancel: &CancellationToken,
        stats: &mut RunStats,
    ) {
        stats.batches += 1;
        debug!(
            "📦 dispatching batch #{} ({} docs, {} bytes, {} already in flight)",
            batch.sequence,
            batch.len(),
            batch.bytes,
            in_flight.len()
        );

        let submitter = self.submitter.clone();
        let cancel = retry_cancel.clone();
        in_flight.spawn(async move {
            let attempt = AssertUnwindSafe(submitter.submit_with_retry(&batch, &cancel))
                .catch_unwind()
                .await;
            match attempt {
                Ok(report) => TaskReport::Finished(report),
                Err(panic) => TaskReport::Panicked {
                    document_refs: batch.document_refs().cloned().collect(),
                    message: panic_message(panic.as_ref()),
                },
            }
        });
    }

    /// 🧾 Record a finished submission. Returns a reason to stop, if it brought one.
    fn absorb(
        &mut self,
        joined: Result<TaskReport, tokio::task::JoinError>,
        stats: &mut RunStats,
        retry_cancel: &CancellationToken,
    ) -> Option<Halt> {
        let report = match joined {
            Ok(report) => report,
            Err(join_error) => TaskReport::Panicked {
                // -- tasks are never aborted and panics are caught inside, so this is a runtime teardown
                document_refs: Vec::new(),
                message: join_error.to_string(),
            },
        };

        match report {
            TaskReport::Finished(report) => {
                stats.retries += u64::from(report.attempts.saturating_sub(1));
                self.tracker.record(&report.outcomes);
                match report.verdict {
                    Verdict::Delivered | Verdict::Abandoned => None,
                    Verdict::Exhausted(error) => {
                        retry_cancel.cancel();
                        Some(Halt::Exhausted(error))
                    }
                }
            }
            TaskReport::Panicked {
                document_refs,
                message,
            } => {
                error!("💀 a submission task panicked: {}", message);
                let outcomes: Vec<Outcome> = document_refs
                    .into_iter()
                    .map(|document_ref| {
                        Outcome::failure(document_ref, ErrorKind::Transport, format!("submission panicked: {}", message))
                    })
                    .collect();
                self.tracker.record(&outcomes);
                retry_cancel.cancel();
                Some(Halt::Panicked(PipelineError::SubmissionPanicked(message)))
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemorySink, InMemorySource};
    use crate::common::ItemStatus;
    use crate::errors::TransportError;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn numbered(n: u64) -> Vec<Document> {
        (0..n).map(|i| doc(json!({"id": i, "title": format!("doc {i}")}))).collect()
    }

    fn config(batch: usize) -> PipelineConfig {
        PipelineConfig {
            max_batch_count: batch,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            ..PipelineConfig::new("idx")
        }
    }

    /// 🙅 Rejects every third document by position.
    #[derive(Debug)]
    struct PickySink;

    #[async_trait]
    impl Sink for PickySink {
        async fn bulk(&self, batch: &Batch) -> Result<Vec<ItemStatus>, TransportError> {
            Ok(batch
                .document_refs()
                .map(|document_ref| {
                    if document_ref.position % 3 == 2 {
                        ItemStatus::Rejected {
                            status: 400,
                            reason: "mapper_parsing_exception".into(),
                        }
                    } else {
                        ItemStatus::Accepted { id: None }
                    }
                })
                .collect())
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// 📡 Fails the first `failures` calls in transit, then accepts everything.
    #[derive(Debug)]
    struct FlakySink {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakySink {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Sink for FlakySink {
        async fn bulk(&self, batch: &Batch) -> Result<Vec<ItemStatus>, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(TransportError::Connection("connection refused".into()));
            }
            Ok(vec![ItemStatus::Accepted { id: None }; batch.len()])
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// 🧮 Remembers the most submissions it ever saw at once.
    #[derive(Debug, Default)]
    struct CrowdCountingSink {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Sink for CrowdCountingSink {
        async fn bulk(&self, batch: &Batch) -> Result<Vec<ItemStatus>, TransportError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![ItemStatus::Accepted { id: None }; batch.len()])
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// 🐢 Batch #1 is refused on the spot, every time. Every other batch spends a full
    /// second on the wire before it fails too.
    #[derive(Debug, Default)]
    struct OneFastOthersSlowSink {
        sibling_calls: AtomicU32,
    }

    #[async_trait]
    impl Sink for OneFastOthersSlowSink {
        async fn bulk(&self, batch: &Batch) -> Result<Vec<ItemStatus>, TransportError> {
            if batch.sequence == 1 {
                return Err(TransportError::Connection("connection refused".into()));
            }
            self.sibling_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            Err(TransportError::Connection("read timed out".into()))
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// 💥 Accepts everything, except batch #2, which it takes down with it.
    #[derive(Debug, Default)]
    struct ExplodingSink {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Sink for ExplodingSink {
        async fn bulk(&self, batch: &Batch) -> Result<Vec<ItemStatus>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if batch.sequence == 2 {
                panic!("boom");
            }
            Ok(vec![ItemStatus::Accepted { id: None }; batch.len()])
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// 🎬 Plays back a script of pulls. When the script runs out it either ends the
    /// sequence, or trips the cancellation token and hangs like a quiet upstream.
    #[derive(Debug)]
    struct ScriptedSource {
        script: VecDeque<anyhow::Result<Document>>,
        cancel_when_dry: Option<CancellationToken>,
    }

    #[async_trait]
    impl Source for ScriptedSource {
        async fn next_document(&mut self) -> anyhow::Result<Option<Document>> {
            match self.script.pop_front() {
                Some(pulled) => pulled.map(Some),
                None => match self.cancel_when_dry {
                    Some(ref cancel) => {
                        cancel.cancel();
                        std::future::pending::<()>().await;
                        Ok(None)
                    }
                    None => Ok(None),
                },
            }
        }
    }

    #[tokio::test]
    async fn the_one_where_seven_docs_ship_as_three_three_one() -> anyhow::Result<()> {
        let sink = Arc::new(InMemorySink::new());
        let mut pipeline = Pipeline::new(InMemorySource::new(numbered(7)), sink.clone(), config(3))?;

        let summary = pipeline.start().await?;

        assert_eq!(sink.batch_sizes().await, vec![3, 3, 1]);
        assert_eq!(
            (summary.attempted, summary.succeeded, summary.failed),
            (7, 7, 0)
        );
        assert_eq!(summary.terminal_state, TerminalState::Completed);
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.error, None);
        assert_eq!(pipeline.state(), PipelineState::Completed);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_empty_source_is_a_quiet_success() -> anyhow::Result<()> {
        let sink = Arc::new(InMemorySink::new());
        let mut pipeline = Pipeline::new(InMemorySource::new(Vec::new()), sink.clone(), config(3))?;
        let summary = pipeline.start().await?;
        assert_eq!(summary.attempted, 0);
        assert_eq!(summary.terminal_state, TerminalState::Completed);
        assert!(sink.batch_sizes().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_every_third_doc_bounces_and_the_run_carries_on() -> anyhow::Result<()> {
        let mut pipeline = Pipeline::new(InMemorySource::new(numbered(10)), Arc::new(PickySink), config(4))?;
        let mut progress = pipeline.subscribe();

        let summary = pipeline.start().await?;

        assert_eq!(summary.failed, 3);
        assert_eq!(summary.succeeded, 7);
        assert_eq!(summary.attempted, summary.succeeded + summary.failed);
        assert_eq!(summary.terminal_state, TerminalState::Completed);

        let last = *progress.borrow_and_update();
        assert_eq!(last, ProgressSnapshot { attempted: 10, succeeded: 7, failed: 3 });
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_network_hiccups_and_nobody_notices() -> anyhow::Result<()> {
        let sink = FlakySink::new(2);
        let mut pipeline = Pipeline::new(InMemorySource::new(numbered(5)), sink.clone(), config(5))?;

        let summary = pipeline.start().await?;

        assert_eq!(summary.succeeded, 5);
        assert_eq!(summary.retries, 2);
        assert_eq!(summary.terminal_state, TerminalState::Completed);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_cluster_never_comes_back() -> anyhow::Result<()> {
        let sink = FlakySink::new(u32::MAX);
        let cfg = PipelineConfig {
            max_retries: 2,
            ..config(2)
        };
        let mut pipeline = Pipeline::new(InMemorySource::new(numbered(6)), sink.clone(), cfg)?;

        let summary = pipeline.start().await?;

        assert_eq!(summary.terminal_state, TerminalState::Failed);
        assert!(matches!(
            summary.error,
            Some(PipelineError::RetriesExhausted { attempts: 3, .. })
        ));
        // -- 🛑 the driver stopped pulling after the first batch gave up
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(pipeline.state(), PipelineState::Failed);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_leftovers_are_marked_never_sent() -> anyhow::Result<()> {
        let sink = FlakySink::new(u32::MAX);
        let one_doc = BulkItem::new(
            DocumentRef { position: 0, key: None },
            BulkAction::Index,
            "idx",
            None,
            &numbered(1)[0],
        )
        .encoded_len();
        // -- 📏 byte limit fits one doc, so every push closes the previous batch and keeps one pending
        let cfg = PipelineConfig {
            max_retries: 0,
            max_batch_bytes: one_doc + 1,
            ..config(100)
        };
        let mut pipeline = Pipeline::new(InMemorySource::new(numbered(5)), sink, cfg)?;

        let summary = pipeline.start().await?;

        assert_eq!(summary.terminal_state, TerminalState::Failed);
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.unsent, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.succeeded, 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_source_dies_mid_stream() -> anyhow::Result<()> {
        let mut script: VecDeque<anyhow::Result<Document>> = numbered(4).into_iter().map(Ok).collect();
        script.push_back(Err(anyhow!("disk on fire")));
        script.push_back(Ok(doc(json!({"id": "never pulled"}))));
        let source = ScriptedSource {
            script,
            cancel_when_dry: None,
        };
        let sink = Arc::new(InMemorySink::new());
        let mut pipeline = Pipeline::new(source, sink.clone(), config(3))?;

        let summary = pipeline.start().await?;

        assert_eq!(summary.terminal_state, TerminalState::Failed);
        assert!(matches!(summary.error, Some(PipelineError::Source(ref message)) if message.contains("disk on fire")));
        // -- ✅ the first full batch landed before the fire and stays counted
        assert_eq!(sink.batch_sizes().await, vec![3]);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.attempted, 4);
        assert_eq!(summary.unsent, 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_ctrl_c_leaves_the_half_batch_behind() -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        let source = ScriptedSource {
            script: numbered(5).into_iter().map(Ok).collect(),
            cancel_when_dry: Some(cancel.clone()),
        };
        let sink = Arc::new(InMemorySink::new());
        let mut pipeline = Pipeline::new(source, sink.clone(), config(3))?.with_cancellation(cancel);

        let summary = pipeline.start().await?;

        assert_eq!(summary.terminal_state, TerminalState::Cancelled);
        assert_eq!(summary.error, None);
        assert_eq!(sink.batch_sizes().await, vec![3]);
        assert_eq!(summary.attempted, 5);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.unsent, 2);
        assert_eq!(pipeline.state(), PipelineState::Cancelled);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_crowd_never_exceeds_max_in_flight() -> anyhow::Result<()> {
        let sink = Arc::new(CrowdCountingSink::default());
        let cfg = PipelineConfig {
            max_in_flight: 3,
            ..config(2)
        };
        let mut pipeline = Pipeline::new(InMemorySource::new(numbered(20)), sink.clone(), cfg)?;

        let summary = pipeline.start().await?;

        assert_eq!(summary.succeeded, 20);
        assert_eq!(summary.batches, 10);
        assert_eq!(sink.peak.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_one_in_flight_means_strictly_one() -> anyhow::Result<()> {
        let sink = Arc::new(CrowdCountingSink::default());
        let mut pipeline = Pipeline::new(InMemorySource::new(numbered(9)), sink.clone(), config(2))?;
        pipeline.start().await?;
        assert_eq!(sink.peak.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_one_batch_gives_up_and_its_siblings_stop_retrying() -> anyhow::Result<()> {
        let sink = Arc::new(OneFastOthersSlowSink::default());
        let cfg = PipelineConfig {
            max_in_flight: 3,
            max_retries: 3,
            ..config(2)
        };
        let mut pipeline = Pipeline::new(InMemorySource::new(numbered(10)), sink.clone(), cfg)?;

        let summary = pipeline.start().await?;

        // -- ⏱️ batch #1 burns 4 attempts by t=700ms; its siblings' first attempts end at t=1s
        assert_eq!(summary.terminal_state, TerminalState::Failed);
        assert_eq!(
            summary.error,
            Some(PipelineError::RetriesExhausted {
                attempts: 4,
                last: TransportError::Connection("connection refused".into()),
            })
        );
        // -- 🛑 the siblings finished the attempt already on the wire and went no further
        assert_eq!(sink.sibling_calls.load(Ordering::SeqCst), 2);
        assert_eq!(summary.retries, 3);
        // -- 📥 three batches of two were pulled before backpressure held the fourth
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.attempted, 6);
        assert_eq!(summary.failed, 6);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.unsent, 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_panicking_sink_ends_the_run_but_not_the_bookkeeping() -> anyhow::Result<()> {
        let sink = Arc::new(ExplodingSink::default());
        let mut pipeline = Pipeline::new(InMemorySource::new(numbered(10)), sink.clone(), config(2))?;

        let summary = pipeline.start().await?;

        assert_eq!(summary.terminal_state, TerminalState::Failed);
        assert_eq!(summary.error, Some(PipelineError::SubmissionPanicked("boom".into())));
        assert_eq!(summary.attempted, summary.succeeded + summary.failed);
        assert_eq!((summary.succeeded, summary.failed), (2, 2));
        // -- 🚫 nothing went out after the explosion
        assert_eq!(summary.batches, 2);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
        assert_eq!(pipeline.state(), PipelineState::Failed);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_metadata_is_lifted_out_of_the_body() -> anyhow::Result<()> {
        let documents = vec![
            doc(json!({"_id": "explicit", "_index": "elsewhere", "_routing": "r1", "sku": "A1", "title": "hat", "noise": 1})),
            doc(json!({"sku": "B2", "title": "scarf", "noise": 2})),
            doc(json!({"sku": null, "title": "mystery"})),
        ];
        let cfg = PipelineConfig {
            key_field: Some("sku".into()),
            allowed_fields: Some(vec!["title".into()]),
            ..config(10)
        };
        let sink = Arc::new(InMemorySink::new());
        let mut pipeline = Pipeline::new(InMemorySource::new(documents), sink.clone(), cfg)?;

        let summary = pipeline.start().await?;

        assert_eq!(summary.succeeded, 3);
        assert_eq!(sink.document("elsewhere", "explicit").await, Some(json!({"title": "hat"})));
        assert_eq!(sink.document("idx", "B2").await, Some(json!({"title": "scarf"})));
        // -- 🔑 null key means no key, so the sink made one up
        assert_eq!(sink.count("idx").await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_running_it_twice_leaves_one_copy() -> anyhow::Result<()> {
        let sink = Arc::new(InMemorySink::new());
        let cfg = PipelineConfig {
            key_field: Some("id".into()),
            ..config(4)
        };
        for _ in 0..2 {
            let mut pipeline = Pipeline::new(InMemorySource::new(numbered(6)), sink.clone(), cfg.clone())?;
            pipeline.start().await?;
        }
        assert_eq!(sink.count("idx").await, 6);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_start_is_not_a_rewind_button() -> anyhow::Result<()> {
        let mut pipeline = Pipeline::new(
            InMemorySource::new(numbered(1)),
            Arc::new(InMemorySink::new()),
            config(1),
        )?;
        assert_eq!(pipeline.state(), PipelineState::Idle);
        pipeline.start().await?;
        assert_eq!(pipeline.start().await, Err(PipelineError::AlreadyStarted));
        Ok(())
    }

    #[test]
    fn the_one_where_bad_configs_are_turned_away_at_the_door() {
        let bad = [
            PipelineConfig::new(""),
            PipelineConfig { max_batch_count: 0, ..PipelineConfig::new("idx") },
            PipelineConfig { max_batch_bytes: 0, ..PipelineConfig::new("idx") },
            PipelineConfig { max_in_flight: 0, ..PipelineConfig::new("idx") },
            PipelineConfig { base_delay_ms: 5, max_delay_ms: 1, ..PipelineConfig::new("idx") },
        ];
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(PipelineError::InvalidConfig(_))), "{cfg:?}");
        }
        assert_eq!(PipelineConfig::new("idx").validate(), Ok(()));
    }

    #[test]
    fn the_one_where_the_defaults_match_the_bulk_helper() {
        let cfg: PipelineConfig = serde_json::from_value(json!({"index_target": "idx"})).unwrap();
        assert_eq!(cfg, PipelineConfig::new("idx"));
        assert_eq!(cfg.max_batch_count, 500);
        assert_eq!(cfg.max_batch_bytes, 104_857_600);
        assert_eq!(cfg.retry_policy().base_delay, Duration::from_secs(2));
        assert_eq!(cfg.retry_policy().max_delay, Duration::from_secs(600));
    }

    #[test]
    fn the_one_where_the_summary_serializes_its_error_as_text() {
        let summary = RunSummary {
            attempted: 1,
            succeeded: 0,
            failed: 1,
            unsent: 1,
            batches: 0,
            retries: 0,
            terminal_state: TerminalState::Failed,
            error: Some(PipelineError::Source("boom".into())),
        };
        let rendered = serde_json::to_value(&summary).unwrap();
        assert_eq!(rendered["terminal_state"], json!("Failed"));
        assert!(rendered["error"].as_str().unwrap().contains("boom"));
    }

    #[test]
    fn the_one_where_panic_payloads_become_words() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("kaboom");
        assert_eq!(panic_message(boxed.as_ref()), "kaboom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("kablam"));
        assert_eq!(panic_message(boxed.as_ref()), "kablam");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert!(panic_message(boxed.as_ref()).contains("non-string"));
    }
}
