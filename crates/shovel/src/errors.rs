//! 💀 Typed errors for the pipeline core.
//!
//! The plumbing (config, backend construction, the CLI) lives on `anyhow` and its
//! context chains. The core needs errors it can match on: the retry loop has to know a
//! transport failure when it sees one, and the run summary has to say which fatal thing
//! ended the run. Those get real enums.

use std::time::Duration;

use thiserror::Error;

/// 📡 A bulk request that failed as a whole. Every document in it is in limbo.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("📡 bulk request never landed: {0}")]
    Connection(String),

    #[error("⏱️ bulk request ran past its {0:?} deadline")]
    Timeout(Duration),

    #[error("💀 backend rejected the whole bulk request with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("🧩 backend answered with an unreadable bulk response: {0}")]
    MalformedResponse(String),

    #[error("🧮 backend returned {returned} item results for a batch of {expected} documents")]
    ItemCountMismatch { expected: usize, returned: usize },
}

impl TransportError {
    /// 🔁 Whether sending the same request again could get a different answer.
    ///
    /// A 4xx on the whole request (bad credentials, body too large, unknown endpoint) comes
    /// back the same every time. 408 and 429 are the exceptions: the backend asked us to wait.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Status { status, .. } => {
                !(400..500).contains(status) || matches!(status, 408 | 429)
            }
            _ => true,
        }
    }
}

/// 🛑 Things that stop a pipeline run, or stop it from starting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("💀 batch gave up after {attempts} attempts, last error: {last}")]
    RetriesExhausted { attempts: u32, last: TransportError },

    #[error("💀 source failed mid-stream: {0}")]
    Source(String),

    #[error("💀 a submission task died before reporting back: {0}")]
    SubmissionPanicked(String),

    #[error("🔒 pipeline already started; sources don't rewind, build a new pipeline")]
    AlreadyStarted,

    #[error("🔧 invalid pipeline config: {0}")]
    InvalidConfig(String),
}
