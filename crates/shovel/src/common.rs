//! 📦 Common data structures, the load-bearing structs of shovel.
//!
//! A [`Document`] is whatever the source handed us: a JSON object, no schema, no promises.
//! A [`BulkItem`] is that document after it has been told where it is going (index, id,
//! routing, action) and serialized once, so nobody downstream has to serialize it again.
//! A [`Batch`] is a bounded, ordered pile of items that travels to the backend as one
//! bulk request. An [`Outcome`] is what came back for each item, one per document,
//! in the same order, no exceptions. 🦆

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 📄 One record from the source. Field name → value. Shape is the caller's business.
pub type Document = serde_json::Map<String, Value>;

/// 🏷️ How a document is identified in outcomes and logs.
///
/// `position` is the 0-based pull order and always present. `key` is the document id sent
/// to the backend, when we have one (a configured key field or an explicit `_id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DocumentRef {
    pub position: u64,
    pub key: Option<String>,
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "#{} ({})", self.position, key),
            None => write!(f, "#{}", self.position),
        }
    }
}

/// 🎬 The bulk action attached to every document of a run.
///
/// `Index` overwrites by key (last write wins), which is what makes retries safe.
/// `Create` refuses to overwrite and reports a conflict instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    #[default]
    Index,
    Create,
}

impl BulkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkAction::Index => "index",
            BulkAction::Create => "create",
        }
    }
}

/// 🎯 A single document, addressed and pre-serialized, ready to ride in a batch.
///
/// Both halves of the NDJSON pair are rendered at construction. The batcher needs the
/// byte count, the sinks need the bytes, and serializing twice is how benchmarks get sad.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItem {
    pub document_ref: DocumentRef,
    pub action: BulkAction,
    pub index: String,
    pub routing: Option<String>,
    /// 📦 `{"index":{"_index":...,"_id":...}}`, no trailing newline
    pub action_line: String,
    /// 📦 the projected document body as compact JSON, no trailing newline
    pub source: String,
}

impl BulkItem {
    /// 🏗️ Address a document and render its bulk pair.
    ///
    /// The action metadata is built from whatever is known: `_index` always, `_id` and
    /// `routing` only when present. Absent fields are omitted rather than sent as null,
    /// so the backend auto-generates an id for keyless documents.
    pub fn new(
        document_ref: DocumentRef,
        action: BulkAction,
        index: impl Into<String>,
        routing: Option<String>,
        body: &Document,
    ) -> Self {
        let index = index.into();

        let mut metadata = serde_json::Map::new();
        metadata.insert("_index".to_string(), Value::String(index.clone()));
        if let Some(ref id) = document_ref.key {
            metadata.insert("_id".to_string(), Value::String(id.clone()));
        }
        if let Some(ref route) = routing {
            metadata.insert("routing".to_string(), Value::String(route.clone()));
        }

        let mut envelope = serde_json::Map::new();
        envelope.insert(action.as_str().to_string(), Value::Object(metadata));

        // -- 🔒 Value's Display can't fail, so no Result to babysit like serde_json::to_string
        let action_line = Value::Object(envelope).to_string();
        let source = Value::Object(body.clone()).to_string();

        Self {
            document_ref,
            action,
            index,
            routing,
            action_line,
            source,
        }
    }

    /// 📏 Bytes this item adds to an NDJSON bulk body: both lines plus their newlines.
    pub fn encoded_len(&self) -> usize {
        self.action_line.len() + self.source.len() + 2
    }
}

/// 📦 A bounded, ordered group of items submitted together as one bulk request.
///
/// Immutable once the batcher lets go of it. Submission tasks get it by value and
/// hand outcomes back in item order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    /// 🔢 1-based batch number within the run, handy for logs
    pub sequence: u64,
    pub items: Vec<BulkItem>,
    /// 📏 sum of `encoded_len` over `items`
    pub bytes: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn document_refs(&self) -> impl Iterator<Item = &DocumentRef> {
        self.items.iter().map(|item| &item.document_ref)
    }

    /// 📡 Render the `_bulk` request body: `action\nsource\n` per item, trailing newline
    /// included because the bulk API refuses bodies without one.
    pub fn render_ndjson(&self) -> String {
        let mut payload = String::with_capacity(self.bytes);
        for item in &self.items {
            payload.push_str(&item.action_line);
            payload.push('\n');
            payload.push_str(&item.source);
            payload.push('\n');
        }
        payload
    }
}

/// 🏷️ Why a document did not make it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// 🙅 the backend looked at this one document and said no (mapping, conflict, malformed)
    DocumentRejected,
    /// 📡 the whole request failed to land (connection, timeout, 5xx, garbage response)
    Transport,
    /// 💀 never sent: an earlier batch burned through its retries and the run stopped
    RetriesExhausted,
    /// 💀 never sent: the source blew up mid-run
    Source,
    /// 🛑 never sent: the run was cancelled while this document waited for its batch
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::DocumentRejected => "document_rejected",
            ErrorKind::Transport => "transport",
            ErrorKind::RetriesExhausted => "retries_exhausted",
            ErrorKind::Source => "source",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// 💀 The failure half of an [`Outcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

/// ✅ or 💀, one per document, same order as its batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub document_ref: DocumentRef,
    pub ok: bool,
    pub error: Option<Failure>,
}

impl Outcome {
    pub fn success(document_ref: DocumentRef) -> Self {
        Self {
            document_ref,
            ok: true,
            error: None,
        }
    }

    pub fn failure(document_ref: DocumentRef, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            document_ref,
            ok: false,
            error: Some(Failure {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|failure| failure.kind)
    }
}

/// 📬 What a backend reports for one item of a bulk request, before we attach document refs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Accepted { id: Option<String> },
    Rejected { status: u16, reason: String },
}

/// 🔑 Turn an id-ish JSON value into the string the bulk API wants.
/// Strings go through untouched; numbers and friends use their JSON rendering.
pub(crate) fn key_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
