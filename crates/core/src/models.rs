//! Job, chunk and search result records.
//!
//! Field names are the wire names: results are persisted as JSON documents
//! and the message envelopes travel over the bus as JSON.

use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;

/// Producers may encode an empty list as `null`; read it back as empty.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Lifecycle state of a search job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether no further transitions are expected from this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// A search job as tracked by the job manager.
///
/// Not persisted by the storage layer; carried here so that chunk and result
/// records share one vocabulary with their producers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub request_id: String,
    pub pattern: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub files: Vec<String>,
    pub status: JobStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Progress percentage, 0 to 100.
    pub progress: f64,
    pub is_cancelled: bool,

    pub case_sensitive: bool,
    pub regex: bool,
    pub context_lines: u32,
}

impl Job {
    /// Create a pending job for a pattern over a set of files.
    pub fn new(id: impl Into<String>, pattern: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            id: id.into(),
            request_id: String::new(),
            pattern: pattern.into(),
            files,
            status: JobStatus::Pending,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            completed_at: None,
            error: None,
            progress: 0.0,
            is_cancelled: false,
            case_sensitive: true,
            regex: false,
            context_lines: 0,
        }
    }
}

/// A byte range of a source log file handed to a search worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub job_id: String,
    pub file_name: String,
    pub start_byte: u64,
    pub end_byte: u64,
    /// Payload length in bytes, as declared by the producer.
    pub size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(default)]
    pub start_line: u64,
    #[serde(default)]
    pub end_line: u64,
}

impl Chunk {
    /// Create a chunk covering `[start_byte, end_byte)` of `file_name`.
    pub fn new(
        id: impl Into<String>,
        job_id: impl Into<String>,
        file_name: impl Into<String>,
        start_byte: u64,
        end_byte: u64,
    ) -> Self {
        Self {
            id: id.into(),
            job_id: job_id.into(),
            file_name: file_name.into(),
            start_byte,
            end_byte,
            size: end_byte.saturating_sub(start_byte),
            created_at: OffsetDateTime::now_utc(),
            start_line: 0,
            end_line: 0,
        }
    }
}

/// Lines surrounding a match.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchContext {
    #[serde(default, deserialize_with = "null_as_default")]
    pub before: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub after: Vec<String>,
}

/// A single matching line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub line_number: u64,
    pub content: String,
    pub file_name: String,
    #[serde(default)]
    pub context: MatchContext,
}

/// Output of searching one chunk.
///
/// Several results may exist for the same chunk when a worker retries; the
/// store keys them by result id, not chunk id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub job_id: String,
    pub chunk_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub matches: Vec<Match>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    pub processed_bytes: u64,
    pub processed_lines: u64,
    pub match_count: u64,
}

impl SearchResult {
    /// Create a result from its matches, deriving `match_count`.
    pub fn new(
        id: impl Into<String>,
        job_id: impl Into<String>,
        chunk_id: impl Into<String>,
        matches: Vec<Match>,
    ) -> Self {
        let match_count = matches.len() as u64;
        Self {
            id: id.into(),
            job_id: job_id.into(),
            chunk_id: chunk_id.into(),
            matches,
            created_at: OffsetDateTime::now_utc(),
            processed_bytes: 0,
            processed_lines: 0,
            match_count,
        }
    }
}

/// A log file present in the logs bucket.
///
/// Rebuilt from listing metadata on every call; never cached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFile {
    pub name: String,
    pub path: String,
    pub size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl LogFile {
    /// Describe a file about to be uploaded under `path`.
    pub fn for_path(path: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        Self {
            name: base_name(&path).to_string(),
            path,
            size,
            updated_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Final segment of a slash-separated object path.
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Aggregate counters for a job.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total_files: u64,
    pub processed_files: u64,
    pub total_chunks: u64,
    pub processed_chunks: u64,
    pub total_matches: u64,
    pub bytes_processed: u64,
}

impl JobStats {
    /// Fold one chunk's result into the counters.
    pub fn record_result(&mut self, result: &SearchResult) {
        self.processed_chunks += 1;
        self.total_matches += result.match_count;
        self.bytes_processed += result.processed_bytes;
    }
}

/// Work item sent to a search worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkMessage {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub pattern: String,
    pub case_sensitive: bool,
    pub regex: bool,
    pub context_lines: u32,
}

impl ChunkMessage {
    /// Pair a chunk with the search options of the job that owns it.
    pub fn for_job(chunk: Chunk, job: &Job) -> Self {
        Self {
            chunk,
            pattern: job.pattern.clone(),
            case_sensitive: job.case_sensitive,
            regex: job.regex,
            context_lines: job.context_lines,
        }
    }
}

/// Result reported back by a search worker, with its partial stats.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    #[serde(flatten)]
    pub result: SearchResult,
    pub stats: JobStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample_result() -> SearchResult {
        SearchResult {
            id: "r1".to_string(),
            job_id: "j1".to_string(),
            chunk_id: "c1".to_string(),
            matches: vec![Match {
                line_number: 12,
                content: "ERROR disk full".to_string(),
                file_name: "svc/app.log".to_string(),
                context: MatchContext {
                    before: vec!["INFO start".to_string()],
                    after: vec![],
                },
            }],
            created_at: datetime!(2024-05-01 10:00:00 UTC),
            processed_bytes: 4096,
            processed_lines: 80,
            match_count: 1,
        }
    }

    #[test]
    fn test_job_status_wire_names() {
        let json = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
        let status: JobStatus = serde_json::from_str("\"CANCELLED\"").unwrap();
        assert_eq!(status, JobStatus::Cancelled);
        assert!(status.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }

    #[test]
    fn test_result_json_field_names() {
        let value = serde_json::to_value(sample_result()).unwrap();
        assert_eq!(value["job_id"], "j1");
        assert_eq!(value["chunk_id"], "c1");
        assert_eq!(value["match_count"], 1);
        assert_eq!(value["processed_bytes"], 4096);
        assert_eq!(value["created_at"], "2024-05-01T10:00:00Z");
        assert_eq!(value["matches"][0]["line_number"], 12);
        assert_eq!(value["matches"][0]["context"]["before"][0], "INFO start");
    }

    #[test]
    fn test_result_decodes_without_matches() {
        let json = r#"{
            "id": "r2", "job_id": "j1", "chunk_id": "c9",
            "created_at": "2024-05-01T10:00:00Z",
            "processed_bytes": 0, "processed_lines": 0, "match_count": 0
        }"#;
        let result: SearchResult = serde_json::from_str(json).unwrap();
        assert!(result.matches.is_empty());
    }

    #[test]
    fn test_result_decodes_null_lists() {
        let json = r#"{
            "id": "r3", "job_id": "j1", "chunk_id": "c2", "matches": null,
            "created_at": "2024-05-01T10:00:00Z",
            "processed_bytes": 512, "processed_lines": 9, "match_count": 0
        }"#;
        let result: SearchResult = serde_json::from_str(json).unwrap();
        assert!(result.matches.is_empty());
        assert_eq!(result.processed_lines, 9);

        let json = r#"{
            "line_number": 4, "content": "ERROR x", "file_name": "app.log",
            "context": {"before": null, "after": null}
        }"#;
        let found: Match = serde_json::from_str(json).unwrap();
        assert_eq!(found.context, MatchContext::default());

        let json = r#"{
            "id": "j2", "request_id": "q", "pattern": "ERROR", "files": null,
            "status": "PENDING", "created_at": "2024-05-01T10:00:00Z",
            "progress": 0.0, "is_cancelled": false,
            "case_sensitive": true, "regex": false, "context_lines": 0
        }"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert!(job.files.is_empty());
    }

    #[test]
    fn test_job_optional_timestamps() {
        let mut job = Job::new("j1", "ERROR", vec!["svc/app.log".to_string()]);
        job.created_at = datetime!(2024-05-01 10:00:00 UTC);
        let value = serde_json::to_value(&job).unwrap();
        assert!(value["started_at"].is_null());
        assert!(value.get("error").is_none());

        let decoded: Job = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_log_file_name_is_last_segment() {
        let file = LogFile::for_path("svc/nested/app.log", 10);
        assert_eq!(file.name, "app.log");
        assert_eq!(base_name("app.log"), "app.log");
        assert_eq!(base_name("a/b/."), ".");
        assert_eq!(base_name("svc/.."), "..");
    }

    #[test]
    fn test_stats_record_result() {
        let mut stats = JobStats::default();
        stats.record_result(&sample_result());
        stats.record_result(&sample_result());
        assert_eq!(stats.processed_chunks, 2);
        assert_eq!(stats.total_matches, 2);
        assert_eq!(stats.bytes_processed, 8192);
    }

    #[test]
    fn test_chunk_message_flattens_chunk() {
        let mut job = Job::new("j1", "timeout", vec![]);
        job.context_lines = 2;
        let chunk = Chunk::new("c1", "j1", "svc/app.log", 0, 100);
        let value = serde_json::to_value(ChunkMessage::for_job(chunk, &job)).unwrap();
        assert_eq!(value["id"], "c1");
        assert_eq!(value["size"], 100);
        assert_eq!(value["pattern"], "timeout");
        assert_eq!(value["context_lines"], 2);
    }
}
