//! Storage error types.

use dgrep_core::StorageCategory;
use std::time::Duration;
use thiserror::Error;

/// Object gateway errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("size mismatch for {key}: declared {declared} bytes, received {actual}")]
    SizeMismatch {
        key: String,
        declared: u64,
        actual: u64,
    },

    #[error("object {key} rejected by store: {message}")]
    Rejected { key: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for gateway operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// An object that could not be removed while deleting a job.
#[derive(Debug)]
pub struct FailedObject {
    pub bucket: String,
    /// Object key, or the listing prefix when enumeration itself failed.
    pub key: String,
    pub error: StorageError,
}

/// Job store errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    InvalidConfiguration(#[from] dgrep_core::Error),

    #[error("failed to provision bucket {bucket}: {source}")]
    BucketProvisioningFailed {
        bucket: String,
        source: StorageError,
    },

    #[error("no bucket configured for category {0}")]
    MissingBucket(StorageCategory),

    #[error("invalid {kind}: {value:?}")]
    InvalidIdentifier { kind: &'static str, value: String },

    #[error("failed to upload log file {file}: {source}")]
    UploadFailed { file: String, source: StorageError },

    #[error("failed to store chunk {chunk_id}: {source}")]
    ChunkWriteFailed {
        chunk_id: String,
        source: StorageError,
    },

    #[error("chunk {chunk_id} of job {job_id} not found")]
    ChunkNotFound { job_id: String, chunk_id: String },

    #[error("failed to read chunk {chunk_id} of job {job_id}: {source}")]
    ChunkReadFailed {
        job_id: String,
        chunk_id: String,
        source: StorageError,
    },

    #[error("object {key} carries malformed tag {tag}={value:?}")]
    CorruptMetadata {
        key: String,
        tag: &'static str,
        value: String,
    },

    #[error("failed to encode result {result_id}: {source}")]
    ResultEncodeFailed {
        result_id: String,
        source: serde_json::Error,
    },

    #[error("failed to store result {result_id}: {source}")]
    ResultWriteFailed {
        result_id: String,
        source: StorageError,
    },

    #[error("failed to delete {} object(s) of job {job_id}", failed.len())]
    PartialDeleteFailure {
        job_id: String,
        failed: Vec<FailedObject>,
    },

    #[error("health check failed for bucket {bucket}: {reason}")]
    HealthCheckFailed { bucket: String, reason: String },

    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl Error {
    /// Whether the error reports a typed absence rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ChunkNotFound { .. })
    }
}

/// Result type for job store operations.
pub type Result<T> = std::result::Result<T, Error>;
