//! 🔌 Backends: where the real I/O happens.
//!
//! 🚰 Sources pour documents in, 🕳️ Sinks take bulk requests and report back per item.
//! Everything between them is the pipeline's business and none of theirs.
//!
//! Pattern, same on both ends: trait → concrete impls → enum dispatcher built from config.
//! The pipeline itself is generic over `Source` and `Sink`, so library callers can bring
//! their own without touching the enums. The enums exist for the config-driven path.

use anyhow::Result;
use async_trait::async_trait;

use crate::common::{Batch, Document, ItemStatus};
use crate::errors::TransportError;

pub mod channel;
pub mod elasticsearch;
pub mod file;
pub mod in_mem;

pub use channel::{ChannelSource, StreamSource};
pub use elasticsearch::{ElasticsearchSink, ElasticsearchSinkConfig};
pub use file::{FileFormat, FileSink, FileSinkConfig, FileSource, FileSourceConfig};
pub use in_mem::{InMemorySink, InMemorySource, InMemorySourceConfig};

// ===== Source =====

/// 🚰 A lazy, possibly endless sequence of documents.
///
/// # Contract
/// - `Ok(Some(doc))` while documents flow.
/// - `Ok(None)` is the explicit end of the sequence. Not an error. The well is dry.
/// - `Err(..)` is a read failure; the pipeline treats it as fatal.
/// - No rewinding. A fresh run wants a fresh source.
#[async_trait]
pub trait Source: std::fmt::Debug + Send {
    async fn next_document(&mut self) -> Result<Option<Document>>;

    /// 📏 How many documents are coming, if the source happens to know. Display only.
    fn size_hint(&self) -> Option<u64> {
        None
    }
}

// ===== Sink =====

/// 🕳️ A backend that accepts bulk requests.
///
/// # Contract
/// - `bulk` sends every item of `batch` in ONE request and returns one [`ItemStatus`] per
///   item, in batch order. Per-item rejections are `Ok`, they are the backend's verdict.
/// - A request that fails as a whole is `Err(TransportError)`; nothing about individual
///   items can be inferred from it.
/// - `&self`, not `&mut self`: several submissions may be in flight on one shared sink.
/// - `close` releases whatever the sink holds. Call it once, at the end of the run.
#[async_trait]
pub trait Sink: std::fmt::Debug + Send + Sync {
    async fn bulk(&self, batch: &Batch) -> std::result::Result<Vec<ItemStatus>, TransportError>;
    async fn close(&self) -> Result<()>;
}

// ===== Config-driven dispatch =====

/// 🎭 Where documents come from, as written in the config file.
#[derive(Debug, serde::Deserialize, Clone)]
pub enum SourceConfig {
    File(FileSourceConfig),
    InMemory(InMemorySourceConfig),
}

/// 🎭 Where documents go, as written in the config file.
#[derive(Debug, serde::Deserialize, Clone)]
pub enum SinkConfig {
    Elasticsearch(ElasticsearchSinkConfig),
    File(FileSinkConfig),
    /// 🧠 dry run: `sink_config = "InMemory"`
    InMemory,
}

/// 🎭 The many faces of a Source, resolved from [`SourceConfig`].
#[derive(Debug)]
pub enum SourceBackend {
    InMemory(InMemorySource),
    File(FileSource),
}

impl SourceBackend {
    pub async fn from_config(config: SourceConfig) -> Result<Self> {
        Ok(match config {
            SourceConfig::File(file_config) => Self::File(FileSource::new(file_config).await?),
            SourceConfig::InMemory(in_mem_config) => {
                Self::InMemory(InMemorySource::new(in_mem_config.documents))
            }
        })
    }
}

#[async_trait]
impl Source for SourceBackend {
    async fn next_document(&mut self) -> Result<Option<Document>> {
        match self {
            SourceBackend::InMemory(source) => source.next_document().await,
            SourceBackend::File(source) => source.next_document().await,
        }
    }

    fn size_hint(&self) -> Option<u64> {
        match self {
            SourceBackend::InMemory(source) => source.size_hint(),
            SourceBackend::File(source) => source.size_hint(),
        }
    }
}

/// 🎭 The many faces of a Sink, resolved from [`SinkConfig`].
#[derive(Debug)]
pub enum SinkBackend {
    Elasticsearch(ElasticsearchSink),
    File(FileSink),
    InMemory(InMemorySink),
}

impl SinkBackend {
    pub async fn from_config(config: SinkConfig) -> Result<Self> {
        Ok(match config {
            SinkConfig::Elasticsearch(es_config) => {
                Self::Elasticsearch(ElasticsearchSink::new(es_config).await?)
            }
            SinkConfig::File(file_config) => Self::File(FileSink::new(file_config).await?),
            SinkConfig::InMemory => Self::InMemory(InMemorySink::new()),
        })
    }
}

#[async_trait]
impl Sink for SinkBackend {
    async fn bulk(&self, batch: &Batch) -> std::result::Result<Vec<ItemStatus>, TransportError> {
        match self {
            SinkBackend::Elasticsearch(sink) => sink.bulk(batch).await,
            SinkBackend::File(sink) => sink.bulk(batch).await,
            SinkBackend::InMemory(sink) => sink.bulk(batch).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            SinkBackend::Elasticsearch(sink) => sink.close().await,
            SinkBackend::File(sink) => sink.close().await,
            SinkBackend::InMemory(sink) => sink.close().await,
        }
    }
}
