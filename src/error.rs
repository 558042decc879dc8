use std::time::Duration;

use thiserror::Error;

/// Failures of the remote blob store and pull-request APIs.
///
/// Errors are `Clone` because a single in-flight fetch may be awaited by many
/// callers, and every one of them receives the same outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("run {run_id} not found")]
    NotFound { run_id: String },

    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("request to {url} timed out after {}s", .after.as_secs())]
    Timeout { url: String, after: Duration },
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// A malformed line in a structured test log.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed log entry on line {line}: {message}")]
pub struct LogParseError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("fetch for run {run_id} was cancelled before it ran")]
    Cancelled { run_id: String },

    #[error("batch fetch was cancelled before it finished")]
    BatchCancelled,

    #[error("test {test} not found in run {run_id}")]
    TestNotFound { run_id: String, test: String },

    #[error(transparent)]
    Log(#[from] LogParseError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Gateway(e) => e.is_not_found(),
            Self::TestNotFound { .. } => true,
            _ => false,
        }
    }
}
