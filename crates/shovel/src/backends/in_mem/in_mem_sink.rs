use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::trace;

use crate::backends::Sink;
use crate::common::{Batch, BulkAction, ItemStatus};
use crate::errors::TransportError;

/// 📦 A sink that never forgets, shaped like a very small search index.
///
/// - `index` overwrites by id, so resubmitting a document leaves exactly one copy.
/// - `create` refuses an id that already exists with a 409, like the real thing.
/// - Documents without an id get an auto-generated one, also like the real thing.
///
/// Clone-able because tests hand one copy to the pipeline and keep another to peek with.
/// The `Arc` means everyone shares the same index.
#[derive(Debug, Default, Clone)]
pub struct InMemorySink {
    state: Arc<Mutex<InMemoryIndex>>,
}

#[derive(Debug, Default)]
struct InMemoryIndex {
    /// 🗂️ index name → (document id → source JSON)
    indices: HashMap<String, HashMap<String, String>>,
    batch_sizes: Vec<usize>,
    next_auto_id: u64,
    closed: bool,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🔍 Fetch a stored document by index and id.
    pub async fn document(&self, index: &str, id: &str) -> Option<Value> {
        let state = self.state.lock().await;
        state
            .indices
            .get(index)
            .and_then(|docs| docs.get(id))
            .and_then(|source| serde_json::from_str(source).ok())
    }

    /// 📊 How many documents live in `index`.
    pub async fn count(&self, index: &str) -> usize {
        let state = self.state.lock().await;
        state.indices.get(index).map_or(0, HashMap::len)
    }

    /// 🧾 Size of every bulk request received, in arrival order.
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.state.lock().await.batch_sizes.clone()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

#[async_trait]
impl Sink for InMemorySink {
    async fn bulk(&self, batch: &Batch) -> std::result::Result<Vec<ItemStatus>, TransportError> {
        let mut state = self.state.lock().await;
        state.batch_sizes.push(batch.len());
        trace!("🧠 in-memory sink swallowing batch #{} ({} items)", batch.sequence, batch.len());

        let mut statuses = Vec::with_capacity(batch.len());
        for item in &batch.items {
            let id = match item.document_ref.key {
                Some(ref key) => key.clone(),
                None => {
                    state.next_auto_id += 1;
                    format!("auto-{}", state.next_auto_id)
                }
            };
            let docs = state.indices.entry(item.index.clone()).or_default();

            match item.action {
                BulkAction::Create if docs.contains_key(&id) => {
                    statuses.push(ItemStatus::Rejected {
                        status: 409,
                        reason: format!(
                            "version_conflict_engine_exception: [{}]: version conflict, document already exists",
                            id
                        ),
                    });
                }
                BulkAction::Index | BulkAction::Create => {
                    docs.insert(id.clone(), item.source.clone());
                    statuses.push(ItemStatus::Accepted { id: Some(id) });
                }
            }
        }
        Ok(statuses)
    }

    async fn close(&self) -> Result<()> {
        // -- 🗑️ nothing to release, we live in RAM. just note that it happened.
        self.state.lock().await.closed = true;
        Ok(())
    }
}
