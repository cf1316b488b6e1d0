use bytes::Bytes;
use dgrep_core::{BucketSpec, Match, MatchContext, SearchResult, StorageOptions};
use dgrep_storage::{ByteStream, JobStore, MemoryGateway, ObjectGateway, StorageResult};
use std::sync::Arc;
use time::macros::datetime;

pub const LOG_BUCKET: &str = "LogStorage";
pub const CHUNK_BUCKET: &str = "ChunkStorage";
pub const RESULT_BUCKET: &str = "ResultStorage";

// S3 bucket names must be lowercase.
#[allow(dead_code)]
pub const S3_LOG_BUCKET: &str = "dgrep-logs";
#[allow(dead_code)]
pub const S3_CHUNK_BUCKET: &str = "dgrep-chunks";
#[allow(dead_code)]
pub const S3_RESULT_BUCKET: &str = "dgrep-results";

/// The three-bucket layout of a typical deployment.
pub fn storage_options() -> StorageOptions {
    StorageOptions::with_buckets(vec![
        BucketSpec::new(LOG_BUCKET, "text", "logs"),
        BucketSpec::new(CHUNK_BUCKET, "text", "chunks"),
        BucketSpec::new(RESULT_BUCKET, "json", "results"),
    ])
}

/// The same layout under names an S3 server accepts.
#[allow(dead_code)]
pub fn s3_storage_options() -> StorageOptions {
    StorageOptions::with_buckets(vec![
        BucketSpec::new(S3_LOG_BUCKET, "text", "logs"),
        BucketSpec::new(S3_CHUNK_BUCKET, "text", "chunks"),
        BucketSpec::new(S3_RESULT_BUCKET, "json", "results"),
    ])
}

#[allow(dead_code)]
pub async fn store_with(gateway: Arc<dyn ObjectGateway>, options: &StorageOptions) -> JobStore {
    JobStore::builder(gateway, options)
        .unwrap()
        .instantiate()
        .await
        .unwrap()
}

/// A ready store over `gateway` with the default bucket layout.
#[allow(dead_code)]
pub async fn store_on(gateway: Arc<dyn ObjectGateway>) -> JobStore {
    store_with(gateway, &storage_options()).await
}

#[allow(dead_code)]
pub async fn memory_store() -> (Arc<MemoryGateway>, JobStore) {
    let gateway = Arc::new(MemoryGateway::new());
    let store = store_on(gateway.clone()).await;
    (gateway, store)
}

/// A result with one match per line.
#[allow(dead_code)]
pub fn sample_result(id: &str, job_id: &str, chunk_id: &str, lines: &[&str]) -> SearchResult {
    let matches = lines
        .iter()
        .enumerate()
        .map(|(i, line)| Match {
            line_number: i as u64 + 1,
            content: line.to_string(),
            file_name: "svc/app.log".to_string(),
            context: MatchContext {
                before: vec![format!("before {i}")],
                after: vec![],
            },
        })
        .collect();

    let mut result = SearchResult::new(id, job_id, chunk_id, matches);
    result.created_at = datetime!(2024-05-01 10:00:00.250 UTC);
    result.processed_bytes = 4096;
    result.processed_lines = 120;
    result
}

/// Generate deterministic test data using a seeded pseudo-random generator.
/// Same seed produces same output (reproducible tests).
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Stream `data` in pieces of at most `piece` bytes.
#[allow(dead_code)]
pub fn split_stream(data: Bytes, piece: usize) -> ByteStream {
    let pieces: Vec<StorageResult<Bytes>> = data
        .chunks(piece)
        .map(|p| Ok(Bytes::copy_from_slice(p)))
        .collect();
    Box::pin(futures::stream::iter(pieces))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_bucket_names_are_lowercase() {
        for bucket in s3_storage_options().buckets {
            assert_eq!(bucket.name, bucket.name.to_lowercase());
            assert!(!bucket.name.contains('_'));
        }
    }

    #[test]
    fn test_seeded_bytes_deterministic() {
        assert_eq!(seeded_bytes(42, 1000), seeded_bytes(42, 1000));
        assert_ne!(seeded_bytes(42, 1000), seeded_bytes(43, 1000));
    }
}
