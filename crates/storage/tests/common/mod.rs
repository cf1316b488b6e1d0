pub mod faults;
pub mod fixtures;

#[allow(unused_imports)]
pub use faults::FaultyGateway;
#[allow(unused_imports)]
pub use fixtures::{
    CHUNK_BUCKET, LOG_BUCKET, RESULT_BUCKET, S3_CHUNK_BUCKET, S3_LOG_BUCKET, S3_RESULT_BUCKET,
    memory_store, s3_storage_options, sample_result, seeded_bytes, split_stream, storage_options,
    store_on, store_with,
};
