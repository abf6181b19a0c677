use std::collections::VecDeque;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, trace};

use crate::backends::Source;
use crate::backends::file::FileFormat;
use crate::common::Document;

// -- 📂 config lives next to the backend that reads it
#[derive(Debug, Deserialize, Clone)]
pub struct FileSourceConfig {
    pub file_name: String,
    #[serde(default)]
    pub format: FileFormat,
}

enum Reader {
    Lines(Lines<BufReader<File>>),
    Array(VecDeque<Document>),
}

/// 📂 Reads documents from a file, NDJSON or JSON array.
///
/// A line or array element that is not a JSON object is a read failure, reported with its
/// location. Garbage in the middle of a file is the source's problem, not a document the
/// backend should get to reject.
pub struct FileSource {
    config: FileSourceConfig,
    reader: Reader,
    /// 📏 lines consumed so far, for error messages
    line_number: u64,
    total: Option<u64>,
}

// 🐛 the reader is a pile of tokio internals nobody wants in their logs
impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("config", &self.config)
            .field("line_number", &self.line_number)
            .field("total", &self.total)
            .finish()
    }
}

impl FileSource {
    /// 🚀 Open the file. JSON arrays are parsed here in full, NDJSON is streamed later.
    pub async fn new(config: FileSourceConfig) -> Result<Self> {
        let (reader, total) = match config.format {
            FileFormat::Ndjson => {
                let file_handle = File::open(&config.file_name).await.context(format!(
                    "💀 Could not open '{}'. It might not exist, or it might not want to be read by us.",
                    config.file_name
                ))?;
                (Reader::Lines(BufReader::new(file_handle).lines()), None)
            }
            FileFormat::JsonArray => {
                let raw = tokio::fs::read(&config.file_name).await.context(format!(
                    "💀 Could not read '{}' into memory. The whole array has to fit, remember.",
                    config.file_name
                ))?;
                let documents = parse_json_array(&raw).context(format!(
                    "💀 '{}' was supposed to be a JSON array of objects. It was not.",
                    config.file_name
                ))?;
                let total = documents.len() as u64;
                debug!("📂 loaded {} documents from '{}'", total, config.file_name);
                (Reader::Array(documents), Some(total))
            }
        };

        Ok(Self {
            config,
            reader,
            line_number: 0,
            total,
        })
    }
}

fn parse_json_array(raw: &[u8]) -> Result<VecDeque<Document>> {
    let values: Vec<Value> = serde_json::from_slice(raw)?;
    values
        .into_iter()
        .enumerate()
        .map(|(element, value)| match value {
            Value::Object(document) => Ok(document),
            other => bail!("element {} is a {}, not an object", element, json_type(&other)),
        })
        .collect()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl Source for FileSource {
    async fn next_document(&mut self) -> Result<Option<Document>> {
        match self.reader {
            Reader::Array(ref mut documents) => Ok(documents.pop_front()),
            Reader::Lines(ref mut lines) => loop {
                let Some(line) = lines.next_line().await.context(format!(
                    "💀 Reading '{}' fell over after line {}",
                    self.config.file_name, self.line_number
                ))?
                else {
                    trace!("📂 '{}' ran dry after {} lines", self.config.file_name, self.line_number);
                    return Ok(None);
                };
                self.line_number += 1;

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let value: Value = serde_json::from_str(trimmed).context(format!(
                    "💀 Line {} of '{}' is not valid JSON",
                    self.line_number, self.config.file_name
                ))?;
                return match value {
                    Value::Object(document) => Ok(Some(document)),
                    other => bail!(
                        "💀 Line {} of '{}' is a {}, not a JSON object",
                        self.line_number,
                        self.config.file_name,
                        json_type(&other)
                    ),
                };
            },
        }
    }

    fn size_hint(&self) -> Option<u64> {
        self.total
    }
}
