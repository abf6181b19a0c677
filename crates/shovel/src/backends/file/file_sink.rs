use std::io::SeekFrom;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{trace, warn};

use crate::backends::Sink;
use crate::common::{Batch, ItemStatus};
use crate::errors::TransportError;

#[derive(Debug, Deserialize, Clone)]
pub struct FileSinkConfig {
    pub file_name: String,
    /// 📎 keep what's already in the file instead of truncating it
    #[serde(default)]
    pub append: bool,
}

/// 🚰 Writes each batch's bulk body to a file. Every item is accepted; disks don't
/// have mappings to violate.
///
/// The file sits behind a mutex because the pipeline may have several submissions in
/// flight. Each batch is written and flushed under one lock, so bodies never interleave.
/// A write that was cut short (an I/O error, or the attempt deadline dropping the future
/// mid-write) leaves the file torn; the next write or the close cuts it back to the end
/// of the last whole batch first, so a retried batch never lands behind its own stump.
#[derive(Debug)]
pub struct FileSink {
    file_name: String,
    shelf: Mutex<Shelf>,
}

#[derive(Debug)]
struct Shelf {
    file: File,
    /// 📏 bytes that belong to whole batches (or were there before we opened the file)
    committed: u64,
    /// 🩹 a write started and never finished
    torn: bool,
}

impl Shelf {
    async fn mend(&mut self) -> std::io::Result<()> {
        if !self.torn {
            return Ok(());
        }
        warn!("🩹 cutting a half-written batch off the end of the file");
        self.file.set_len(self.committed).await?;
        self.file.seek(SeekFrom::Start(self.committed)).await?;
        self.torn = false;
        Ok(())
    }

    async fn write_batch(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.mend().await?;
        self.torn = true;
        self.file.write_all(payload).await?;
        self.file.flush().await?;
        self.committed += payload.len() as u64;
        self.torn = false;
        Ok(())
    }
}

impl FileSink {
    pub async fn new(config: FileSinkConfig) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(config.append)
            .truncate(!config.append)
            .open(&config.file_name)
            .await
            .context(format!(
                "💀 Could not open '{}' for writing. Check the directory exists and that we're allowed in.",
                config.file_name
            ))?;
        let committed = file
            .metadata()
            .await
            .context(format!("💀 Could not stat '{}'", config.file_name))?
            .len();

        Ok(Self {
            file_name: config.file_name,
            shelf: Mutex::new(Shelf {
                file,
                committed,
                torn: false,
            }),
        })
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn bulk(&self, batch: &Batch) -> std::result::Result<Vec<ItemStatus>, TransportError> {
        let payload = batch.render_ndjson();
        let mut shelf = self.shelf.lock().await;
        shelf.write_batch(payload.as_bytes()).await.map_err(|e| {
            TransportError::Connection(format!("writing to '{}' failed: {}", self.file_name, e))
        })?;
        trace!(
            "📝 wrote batch #{} ({} bytes) to '{}'",
            batch.sequence,
            payload.len(),
            self.file_name
        );

        Ok(batch
            .document_refs()
            .map(|document_ref| ItemStatus::Accepted {
                id: document_ref.key.clone(),
            })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        // -- 🚽 tokio's File finishes writes in the background. Wait for them or lose the tail.
        let mut shelf = self.shelf.lock().await;
        shelf
            .mend()
            .await
            .context(format!("💀 Could not trim a torn batch off '{}'", self.file_name))?;
        shelf
            .file
            .flush()
            .await
            .context(format!("💀 Final flush to '{}' failed", self.file_name))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{BulkAction, BulkItem, Document, DocumentRef};
    use serde_json::json;
    use tempfile::tempdir;

    fn batch(sequence: u64, keys: &[&str]) -> Batch {
        let items: Vec<BulkItem> = keys
            .iter()
            .enumerate()
            .map(|(position, key)| {
                let mut body = Document::new();
                body.insert("k".into(), json!(key));
                BulkItem::new(
                    DocumentRef {
                        position: position as u64,
                        key: Some(key.to_string()),
                    },
                    BulkAction::Index,
                    "idx",
                    None,
                    &body,
                )
            })
            .collect();
        let bytes = items.iter().map(BulkItem::encoded_len).sum();
        Batch {
            sequence,
            items,
            bytes,
        }
    }

    #[tokio::test]
    async fn the_one_where_batches_land_on_disk_as_bulk_bodies() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("out.ndjson");
        let sink = FileSink::new(FileSinkConfig {
            file_name: path.to_string_lossy().into_owned(),
            append: false,
        })
        .await?;

        let first = batch(1, &["a", "b"]);
        let second = batch(2, &["c"]);
        let statuses = sink.bulk(&first).await?;
        sink.bulk(&second).await?;
        sink.close().await?;

        assert_eq!(statuses.len(), 2);
        assert!(statuses
            .iter()
            .all(|status| matches!(status, ItemStatus::Accepted { .. })));

        let written = tokio::fs::read_to_string(&path).await?;
        assert_eq!(written, first.render_ndjson() + &second.render_ndjson());
        assert_eq!(written.lines().count(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_append_mode_keeps_the_old_stuff() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("out.ndjson");
        tokio::fs::write(&path, "old\n").await?;

        let sink = FileSink::new(FileSinkConfig {
            file_name: path.to_string_lossy().into_owned(),
            append: true,
        })
        .await?;
        sink.bulk(&batch(1, &["a"])).await?;
        sink.close().await?;

        let written = tokio::fs::read_to_string(&path).await?;
        assert!(written.starts_with("old\n"));
        assert_eq!(written.lines().count(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_torn_write_is_trimmed_before_the_retry() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("out.ndjson");
        let sink = FileSink::new(FileSinkConfig {
            file_name: path.to_string_lossy().into_owned(),
            append: false,
        })
        .await?;

        let landed = batch(1, &["a"]);
        let retried = batch(2, &["b", "c"]);
        sink.bulk(&landed).await?;
        {
            // -- ✂️ what a deadline firing halfway through write_all leaves behind
            let mut shelf = sink.shelf.lock().await;
            shelf.torn = true;
            shelf.file.write_all(b"{\"index\":{\"_ind").await?;
            shelf.file.flush().await?;
        }
        sink.bulk(&retried).await?;
        sink.close().await?;

        let written = tokio::fs::read_to_string(&path).await?;
        assert_eq!(written, landed.render_ndjson() + &retried.render_ndjson());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_close_trims_a_torn_tail_in_append_mode() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("out.ndjson");
        tokio::fs::write(&path, "old\n").await?;
        let sink = FileSink::new(FileSinkConfig {
            file_name: path.to_string_lossy().into_owned(),
            append: true,
        })
        .await?;

        let landed = batch(1, &["a"]);
        sink.bulk(&landed).await?;
        {
            let mut shelf = sink.shelf.lock().await;
            shelf.torn = true;
            shelf.file.write_all(b"{\"create\":").await?;
            shelf.file.flush().await?;
        }
        sink.close().await?;

        let written = tokio::fs::read_to_string(&path).await?;
        assert_eq!(written, format!("old\n{}", landed.render_ndjson()));
        Ok(())
    }
}
