//! 🧺 The Batcher: accumulates items until a bound says "enough", then hands over a batch.
//!
//! Two bounds, whichever trips first:
//! - count: a batch that reaches `max_batch_count` items is handed over immediately, so a
//!   full batch never sits around waiting for the next pull from a slow source.
//! - bytes: an item that would push the batch past `max_batch_bytes` closes the current
//!   batch and starts the next one. A lone item bigger than the limit still ships as a
//!   batch of one; the backend gets the final word on request size.
//!
//! Byte counts are the NDJSON bytes the item adds to a bulk body, which is an estimate of
//! the request size, not a promise (compression, headers, and so on).

use crate::common::{Batch, BulkItem};

#[derive(Debug)]
pub struct Batcher {
    max_count: usize,
    max_bytes: usize,
    items: Vec<BulkItem>,
    bytes: usize,
    /// 🔢 sequence number of the last batch handed out
    sequence: u64,
}

impl Batcher {
    /// 🏗️ Zero bounds are clamped to 1 so a misconfigured batcher degrades to
    /// one-document batches instead of spinning forever.
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        let max_count = max_count.max(1);
        Self {
            max_count,
            max_bytes: max_bytes.max(1),
            // -- 📦 capacity capped so a max_batch_count of a billion doesn't pre-allocate a billion
            items: Vec::with_capacity(max_count.min(4096)),
            bytes: 0,
            sequence: 0,
        }
    }

    /// 📥 Append an item; returns a completed batch when a bound was reached.
    pub fn push(&mut self, item: BulkItem) -> Option<Batch> {
        let item_bytes = item.encoded_len();

        if !self.items.is_empty() && self.bytes + item_bytes > self.max_bytes {
            // -- ⚖️ byte bound: close what we have, the newcomer opens the next batch.
            // -- Only a batch holding fewer than max_count items can be pending here, so the
            // -- count check below can't also fire on this push unless max_count is 1, and
            // -- with max_count 1 nothing is ever pending.
            let completed = self.take();
            self.append(item, item_bytes);
            return completed;
        }

        self.append(item, item_bytes);
        if self.items.len() >= self.max_count {
            return self.take();
        }
        None
    }

    /// 🚿 Hand over whatever is left. `None` if nothing is.
    pub fn flush(&mut self) -> Option<Batch> {
        self.take()
    }

    /// 📊 Items waiting for their batch to fill.
    pub fn pending(&self) -> usize {
        self.items.len()
    }

    pub fn pending_bytes(&self) -> usize {
        self.bytes
    }

    fn append(&mut self, item: BulkItem, item_bytes: usize) {
        self.bytes += item_bytes;
        self.items.push(item);
    }

    fn take(&mut self) -> Option<Batch> {
        if self.items.is_empty() {
            return None;
        }
        self.sequence += 1;
        let items = std::mem::replace(
            &mut self.items,
            Vec::with_capacity(self.max_count.min(4096)),
        );
        let bytes = std::mem::take(&mut self.bytes);
        Some(Batch {
            sequence: self.sequence,
            items,
            bytes,
        })
    }
}
