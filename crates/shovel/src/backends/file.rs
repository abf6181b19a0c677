//! 📂 File backends: read documents from disk, write bulk bodies to disk.
//!
//! Two input layouts are understood:
//! - `ndjson`: one JSON object per line, streamed, blank lines ignored.
//! - `json_array`: one big `[{...}, {...}]`, the shape most "export to JSON" buttons
//!   produce. It has to be parsed whole, so it is loaded up front and the document count
//!   is known before the first pull.
//!
//! The sink side writes exactly the NDJSON body a `_bulk` request would carry. Handy for
//! dry runs, and for replaying later with `curl --data-binary @file`.

use serde::Deserialize;

mod file_sink;
mod file_source;

pub use file_sink::{FileSink, FileSinkConfig};
pub use file_source::{FileSource, FileSourceConfig};

/// 📄 How the input file lays out its documents.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    #[default]
    Ndjson,
    JsonArray,
}
