//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! Documents leave the process here. One batch, one `POST {url}/_bulk`, one NDJSON body,
//! one response with a verdict per item. Works against Elasticsearch and OpenSearch alike;
//! the `_bulk` dialect is the same on both sides of the fork.
//!
//! Two layers:
//! - [`ElasticsearchSink`]: the HTTP client, the optional gzip, the status code triage.
//! - `bulk_response`: turns the response body into one `ItemStatus` per item, and refuses
//!   to guess when the body is something else.
//!
//! Retries are not this module's business. It reports a `TransportError` and the
//! submitter decides whether to try again. 🦆

mod bulk_response;
mod elasticsearch_sink;

pub use elasticsearch_sink::{ElasticsearchSink, ElasticsearchSinkConfig};
