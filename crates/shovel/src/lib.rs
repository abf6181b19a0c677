//! 🚜 shovel: documents in one end, a search index out the other.
//!
//! A streaming bulk-indexing pipeline. Pull documents from a [`Source`], trim them down to
//! the fields the index cares about, pack them into bounded batches, ship each batch as one
//! bulk request to a [`Sink`], and keep score per document.
//!
//! Library callers build a [`Pipeline`] directly with any `Source`/`Sink` pair. The CLI goes
//! through [`run`], which wires everything up from an [`AppConfig`].

pub mod app_config;
pub mod backends;
pub mod batcher;
pub mod common;
pub mod errors;
pub mod pipeline;
pub mod progress;
pub mod projector;
pub mod submitter;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use crate::app_config::{AppConfig, load_config};
pub use crate::backends::{Sink, SinkBackend, Source, SourceBackend};
pub use crate::common::{Batch, BulkAction, Document, DocumentRef, ErrorKind, Outcome};
pub use crate::errors::{PipelineError, TransportError};
pub use crate::pipeline::{Pipeline, PipelineConfig, PipelineState, RunSummary, TerminalState};
pub use crate::progress::ProgressSnapshot;

/// 🚀 One config-driven run, progress bar included.
///
/// Backend construction failures (file missing, cluster unreachable) come back as `Err`.
/// Once the pipeline is running, its fate is reported in the [`RunSummary`] instead.
pub async fn run(app_config: AppConfig, cancel: CancellationToken) -> Result<RunSummary> {
    let source = SourceBackend::from_config(app_config.source_config)
        .await
        .context("💀 Could not set up the source. Nothing was pulled.")?;
    let sink = Arc::new(
        SinkBackend::from_config(app_config.sink_config)
            .await
            .context("💀 Could not set up the sink. Nothing was sent.")?,
    );

    let label = app_config.pipeline.index_target.clone();
    let mut pipeline = Pipeline::new(source, Arc::clone(&sink), app_config.pipeline)
        .context("💀 The pipeline refused its config")?
        .with_cancellation(cancel);

    let display = progress::spawn_display(label, pipeline.size_hint(), pipeline.subscribe());
    let summary = pipeline.start().await;

    // -- 🧹 close the sink even when the run went sideways; drop the pipeline so the display sees the end
    let closed = sink.close().await;
    drop(pipeline);
    if let Err(join_error) = display.await {
        warn!("📊 progress display fell over: {}", join_error);
    }

    let summary = summary.context("💀 The pipeline could not start")?;
    closed.context("💀 The run finished but the sink didn't close cleanly")?;
    Ok(summary)
}
