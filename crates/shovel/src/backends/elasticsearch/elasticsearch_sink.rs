use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, trace};

use super::bulk_response::decode_bulk_response;
use crate::backends::Sink;
use crate::common::{Batch, ItemStatus};
use crate::errors::TransportError;

// 📡 ElasticsearchSinkConfig: a URL and some opinions about patience.
// Timeouts here are the HTTP client's. The pipeline has its own per-attempt deadline on
// top (`submit_timeout_ms`); whichever is shorter wins.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchSinkConfig {
    /// 📡 Scheme, host and port. `http://localhost:9200`, not `localhost`.
    pub url: String,
    /// 🫁 gzip request bodies. Bulk NDJSON squishes very well.
    #[serde(default)]
    pub compress: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// 📦 The business end of the pipeline: one `_bulk` request per batch.
///
/// The client is built once and shared by every in-flight submission (reqwest pools
/// connections internally, so `&self` is all `bulk` needs).
#[derive(Debug)]
pub struct ElasticsearchSink {
    client: reqwest::Client,
    bulk_url: String,
    compress: bool,
    request_timeout: Duration,
}

impl ElasticsearchSink {
    /// 🚀 Build the client and ping the cluster root.
    ///
    /// A cluster that doesn't answer here fails the run before a single document is pulled,
    /// instead of 50,000 documents and three retry cycles later.
    pub async fn new(config: ElasticsearchSinkConfig) -> Result<Self> {
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(request_timeout)
            .build()
            .context("💀 The HTTP client refused to be born. Probably the TLS stack. Tragic either way.")?;

        let base_url = config.url.trim_end_matches('/').to_string();

        // -- 📡 "Hello? Is this thing on?"
        let response = client.get(&base_url).send().await.context(format!(
            "💀 Knocked on '{}' and nobody answered. Is the cluster up? Is the URL right?",
            base_url
        ))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!(
                "💀 '{}' answered the connectivity ping with HTTP {}. It's alive, but it doesn't like us.",
                base_url,
                status
            );
        }
        debug!("✅ cluster at '{}' is home and answering", base_url);

        Ok(Self {
            client,
            bulk_url: format!("{}/_bulk", base_url),
            compress: config.compress,
            request_timeout,
        })
    }

    fn classify(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(self.request_timeout)
        } else {
            TransportError::Connection(error.to_string())
        }
    }
}

fn gzip(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 4), Compression::fast());
    encoder.write_all(payload)?;
    encoder.finish()
}

#[async_trait]
impl Sink for ElasticsearchSink {
    async fn bulk(&self, batch: &Batch) -> std::result::Result<Vec<ItemStatus>, TransportError> {
        let payload = batch.render_ndjson();
        let request = self
            .client
            .post(&self.bulk_url)
            // ⚠️ x-ndjson, not json. The bulk API is particular about this.
            .header(CONTENT_TYPE, "application/x-ndjson");

        let request = if self.compress {
            let squished = gzip(payload.as_bytes())
                .map_err(|e| TransportError::Connection(format!("gzip failed: {}", e)))?;
            trace!("🫁 batch #{} squished {} → {} bytes", batch.sequence, payload.len(), squished.len());
            request.header(CONTENT_ENCODING, "gzip").body(squished)
        } else {
            request.body(payload)
        };

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        trace!("🚀 batch #{} landed with HTTP {}", batch.sequence, status);
        decode_bulk_response(&body)
    }

    async fn close(&self) -> Result<()> {
        // -- 🔌 the connection pool goes away with the client. nothing buffered, nothing to flush.
        Ok(())
    }
}
