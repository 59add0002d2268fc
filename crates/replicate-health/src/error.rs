//! Error types for the replication health check.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for KV client operations.
pub type KvResult<T> = Result<T, KvError>;

/// Failures reading from the local agent's HTTP API.
#[derive(Debug, Clone, Error)]
pub enum KvError {
    #[error("connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("request for {path} timed out after {timeout:?}")]
    Timeout { path: String, timeout: Duration },

    #[error("request for {path} returned HTTP {status}")]
    Status { path: String, status: u16 },

    #[error("request for {path} failed: {reason}")]
    Request { path: String, reason: String },

    #[error("invalid response for {path}: {reason}")]
    InvalidResponse { path: String, reason: String },
}

impl KvError {
    /// The API path the failed request was addressed to, if known.
    pub fn path(&self) -> Option<&str> {
        match self {
            KvError::Connect { .. } => None,
            KvError::Timeout { path, .. }
            | KvError::Status { path, .. }
            | KvError::Request { path, .. }
            | KvError::InvalidResponse { path, .. } => Some(path),
        }
    }

    /// Whether the agent answered with 404 for this key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, KvError::Status { status: 404, .. })
    }
}

/// Failures inspecting the process table.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    #[error("failed to run {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("process inspection timed out after {0:?}")]
    Timeout(Duration),

    #[error("process inspection exited with {code:?}")]
    UnexpectedExit { code: Option<i32> },

    #[error("{count} instances of {name} are running")]
    MultipleInstances { name: String, count: usize },
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
