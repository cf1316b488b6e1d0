//! Object key layout and tag names.
//!
//! Chunks and results live under `{job_id}/` in their buckets, so everything a
//! job owns can be listed or deleted with a single prefix.

use crate::error::{Error, Result};

pub const TAG_UPLOADED_AT: &str = "uploaded_at";
pub const TAG_JOB_ID: &str = "job_id";
pub const TAG_CHUNK_ID: &str = "chunk_id";
pub const TAG_FILE_NAME: &str = "file_name";
pub const TAG_START_BYTE: &str = "start_byte";
pub const TAG_END_BYTE: &str = "end_byte";
pub const TAG_START_LINE: &str = "start_line";
pub const TAG_END_LINE: &str = "end_line";

/// Prefix shared by every object of a job.
pub fn job_prefix(job_id: &str) -> String {
    format!("{job_id}/")
}

pub fn chunk_key(job_id: &str, chunk_id: &str) -> String {
    format!("{job_id}/chunk_{chunk_id}")
}

pub fn result_key(job_id: &str, result_id: &str) -> String {
    format!("{job_id}/result_{result_id}.json")
}

/// Reject identifiers that would escape their job prefix.
///
/// A `/` in a job id would let the prefix of one job cover another
/// (`a/` covers `a/b/...`), so ids must be non-empty single path segments.
pub fn validate_id(kind: &'static str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains('/') || value.trim() != value {
        return Err(Error::InvalidIdentifier {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Reject log paths that cannot name an object.
pub fn validate_log_path(path: &str) -> Result<()> {
    if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
        return Err(Error::InvalidIdentifier {
            kind: "log path",
            value: path.to_string(),
        });
    }
    Ok(())
}
