//! 🚰 Push-style sources: somebody else produces, the pipeline pulls.
//!
//! [`ChannelSource`] wraps the receiving end of an `async_channel`, so any number of
//! producer tasks can feed one run. [`StreamSource`] adapts any `futures::Stream` of
//! documents. Either one ends when its producer side is done: every sender dropped,
//! or the stream returns `None`.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::backends::Source;
use crate::common::Document;

/// 📬 Documents arriving over a channel. A producer sends `Err` to abort the run.
#[derive(Debug)]
pub struct ChannelSource {
    rx: async_channel::Receiver<Result<Document>>,
}

impl ChannelSource {
    pub fn new(rx: async_channel::Receiver<Result<Document>>) -> Self {
        Self { rx }
    }

    /// 🏗️ A bounded channel plus the source draining it. Hand the sender to your producers.
    pub fn bounded(capacity: usize) -> (async_channel::Sender<Result<Document>>, Self) {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl Source for ChannelSource {
    async fn next_document(&mut self) -> Result<Option<Document>> {
        match self.rx.recv().await {
            Ok(item) => item.map(Some),
            // -- 📪 every sender hung up. That's the end of the sequence, not an error.
            Err(async_channel::RecvError) => Ok(None),
        }
    }
}

/// 🌊 Any `Stream<Item = Result<Document>>` dressed up as a Source.
pub struct StreamSource<St> {
    stream: St,
    size_hint: Option<u64>,
}

impl<St> StreamSource<St>
where
    St: Stream<Item = Result<Document>> + Send + Unpin,
{
    pub fn new(stream: St) -> Self {
        Self {
            stream,
            size_hint: None,
        }
    }

    /// 📏 Tell the progress display how many documents to expect.
    pub fn with_size_hint(mut self, total: u64) -> Self {
        self.size_hint = Some(total);
        self
    }
}

// -- 🎭 streams rarely implement Debug, so we describe the wrapper instead
impl<St> fmt::Debug for StreamSource<St> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource")
            .field("size_hint", &self.size_hint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<St> Source for StreamSource<St>
where
    St: Stream<Item = Result<Document>> + Send + Unpin,
{
    async fn next_document(&mut self) -> Result<Option<Document>> {
        self.stream.next().await.transpose()
    }

    fn size_hint(&self) -> Option<u64> {
        self.size_hint
    }
}
