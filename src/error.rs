//! Error types for reg-harvester
//!
//! Error hierarchy covering:
//! - Shared store (Redis) errors
//! - Job queue errors
//! - Upstream API and search pagination errors
//! - Canonical path derivation errors
//! - Work server protocol errors (with HTTP status mapping)
//! - Result sink, configuration and client worker errors

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for reg-harvester
#[derive(Error, Debug)]
pub enum HarvestError {
    /// Shared store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Job queue errors
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Upstream API errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Search pagination errors
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// Canonical path errors
    #[error("Path error: {0}")]
    Path(#[from] PathError),

    /// Result sink errors
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Work server errors
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Client worker errors
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared key-value store errors
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected an operation
    #[error("Store operation failed: {0}")]
    OperationFailed(String),

    /// Failed to connect
    #[error("Failed to connect to store at '{url}': {reason}")]
    ConnectionFailed { url: String, reason: String },
}

impl StoreError {
    /// Check if this error means the store itself is unreachable
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::ConnectionFailed { .. }
        )
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::OperationFailed(err.to_string())
        }
    }
}

/// Job queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// No jobs are waiting
    #[error("Queue '{name}' is empty")]
    Empty { name: String },

    /// The backing store is unreachable
    #[error("Backing store unavailable: {0}")]
    StoreUnavailable(String),

    /// Any other store failure
    #[error("Store operation failed: {0}")]
    Store(String),

    /// Stored job could not be (de)serialized
    #[error("Failed to serialize/deserialize job: {0}")]
    Serialization(String),
}

impl From<StoreError> for QueueError {
    fn from(err: StoreError) -> Self {
        if err.is_unavailable() {
            QueueError::StoreUnavailable(err.to_string())
        } else {
            QueueError::Store(err.to_string())
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

/// Upstream API errors
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// Request never produced a response
    #[error("Request to '{url}' failed: {reason}")]
    Transport { url: String, reason: String },

    /// Response carried an error status
    #[error("Request to '{url}' returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// Response body was not the expected JSON
    #[error("Invalid response body from '{url}': {reason}")]
    InvalidBody { url: String, reason: String },
}

impl ApiError {
    /// Check if this error should be retried by repeating the request
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport { .. } => true,
            ApiError::Status { status, .. } => *status >= 500 || *status == 429,
            ApiError::InvalidBody { .. } => false,
        }
    }
}

/// Search pagination errors
#[derive(Error, Debug, Clone)]
pub enum SearchError {
    /// Watermark timestamp could not be parsed
    #[error("Invalid watermark '{value}': {reason}")]
    InvalidWatermark { value: String, reason: String },

    /// Page did not have the expected shape
    #[error("Malformed search page: {0}")]
    MalformedPage(String),

    /// Upstream refused the query in a way retrying will not fix
    #[error("Search request rejected: {0}")]
    Upstream(#[from] ApiError),
}

/// Canonical path derivation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Entity JSON has no `data` object
    #[error("Entity is missing its 'data' object")]
    MissingData,
}

/// Result sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    /// Path escapes the sink root or is otherwise unusable
    #[error("Invalid output path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Write failed
    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Payload could not be serialized
    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Work server protocol errors
///
/// Each variant carries the exact message returned to clients in the
/// `{"error": ...}` body.
#[derive(Error, Debug)]
pub enum ServerError {
    /// `client_id` query parameter absent
    #[error("Client ID was not provided")]
    MissingClientId,

    /// `client_id` non-numeric or outside the issued range
    #[error("Invalid client ID")]
    InvalidClientId,

    /// Nothing waiting
    #[error("No jobs available")]
    NoJobs,

    /// PUT body without `results`
    #[error("The body does not contain the results")]
    MissingResults,

    /// PUT body without a usable `directory`
    #[error("No directory was included or was incorrect")]
    InvalidDirectory,

    /// Attachment payload that is not a filename → base64 map
    #[error("The attachments could not be decoded")]
    InvalidAttachment,

    /// Job is not in the in-progress map
    #[error("The job being completed was not in progress")]
    StaleJob,

    /// Job is in progress but claimed by another client
    #[error("The client ID was incorrect")]
    Ownership,

    /// Shared store unreachable
    #[error("Cannot connect to the database")]
    StoreUnavailable,

    /// Any other store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Persisting the payload failed
    #[error("Failed to save results: {0}")]
    Sink(#[from] SinkError),

    /// I/O error while serving
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// HTTP status code this error is reported with
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::MissingClientId | ServerError::InvalidClientId => 401,
            ServerError::NoJobs
            | ServerError::MissingResults
            | ServerError::InvalidDirectory
            | ServerError::InvalidAttachment
            | ServerError::StaleJob
            | ServerError::Ownership => 403,
            ServerError::StoreUnavailable
            | ServerError::Store(_)
            | ServerError::Sink(_)
            | ServerError::Io(_) => 500,
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        if err.is_unavailable() {
            ServerError::StoreUnavailable
        } else {
            ServerError::Store(err.to_string())
        }
    }
}

impl From<QueueError> for ServerError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Empty { .. } => ServerError::NoJobs,
            QueueError::StoreUnavailable(_) => ServerError::StoreUnavailable,
            other => ServerError::Store(other.to_string()),
        }
    }
}

impl axum::response::IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        use axum::Json;

        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// Invalid Redis URL
    #[error("Invalid Redis URL: {0}")]
    InvalidRedisUrl(String),

    /// Invalid work server URL
    #[error("Invalid work server URL '{url}': {reason}")]
    InvalidServerUrl { url: String, reason: String },

    /// Invalid bind address
    #[error("Invalid bind address '{addr}': {reason}")]
    InvalidBindAddress { addr: String, reason: String },

    /// Invalid interval
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    /// Invalid data directory
    #[error("Invalid data directory '{path}': {reason}")]
    InvalidDataDir { path: PathBuf, reason: String },

    /// Not a search endpoint
    #[error("Unknown endpoint '{0}' (expected dockets, documents or comments)")]
    InvalidEndpoint(String),
}

/// Client worker errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// Server had nothing to hand out
    #[error("There are no jobs available")]
    NoJobsAvailable,

    /// Server rejected a request
    #[error("Work server returned HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Request to the work server failed
    #[error("Work server request failed: {0}")]
    Transport(String),

    /// Server response did not have the expected shape
    #[error("Unexpected work server response: {0}")]
    InvalidResponse(String),

    /// Upstream fetch failed
    #[error("Upstream fetch failed: {0}")]
    Api(#[from] ApiError),

    /// Output path could not be derived
    #[error("Could not derive output path: {0}")]
    Path(#[from] PathError),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for queue operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Result type for upstream API calls
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Result type for work server operations
pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// Result type for result sinks
pub type SinkResult<T> = std::result::Result<T, SinkError>;
