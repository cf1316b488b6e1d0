//! Categorized object storage for the dgrep log-search pipeline.
//!
//! This crate provides:
//! - The object gateway capability consumed by the job store
//! - Backends: S3-compatible and in-process memory
//! - Job-prefixed key layout for chunks and results
//! - [`JobStore`], which maps log, chunk and result operations onto buckets

pub mod backends;
pub mod error;
pub mod job_store;
pub mod keys;
pub mod listing;
pub mod traits;

pub use backends::{memory::MemoryGateway, s3::S3Gateway};
pub use error::{Error, FailedObject, Result, StorageError, StorageResult};
pub use job_store::{JobStore, JobStoreBuilder};
pub use listing::{Listing, SkippedObject};
pub use traits::{
    ByteStream, KeyStream, ListOptions, ObjectBody, ObjectGateway, ObjectInfo, ObjectReader,
    ObjectSummary, PutOptions, RemoveOutcome, byte_stream,
};

use dgrep_core::ObjectStoreConfig;
use std::sync::Arc;

/// Create an object gateway from configuration.
pub async fn gateway_from_config(
    config: &ObjectStoreConfig,
) -> StorageResult<Arc<dyn ObjectGateway>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        ObjectStoreConfig::Memory => Ok(Arc::new(MemoryGateway::new())),
        ObjectStoreConfig::S3 {
            endpoint,
            access_key_id,
            secret_access_key,
            ssl,
            region,
            force_path_style,
        } => {
            let gateway = S3Gateway::new(
                endpoint.clone(),
                *ssl,
                region.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            tracing::debug!(endpoint = gateway.endpoint(), "s3 gateway configured");
            Ok(Arc::new(gateway))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gateway_from_config_memory_ok() {
        let gateway = gateway_from_config(&ObjectStoreConfig::Memory)
            .await
            .unwrap();
        gateway.create_bucket("logs").await.unwrap();
        assert!(gateway.bucket_exists("logs").await.unwrap());
        assert_eq!(gateway.backend_name(), "memory");
    }

    #[tokio::test]
    async fn gateway_from_config_s3_ok() {
        let config = ObjectStoreConfig::S3 {
            endpoint: Some("minio:9000".to_string()),
            access_key_id: Some("access".to_string()),
            secret_access_key: Some("secret".to_string()),
            ssl: false,
            region: Some("us-east-1".to_string()),
            force_path_style: true,
        };

        let gateway = gateway_from_config(&config).await.unwrap();
        assert_eq!(gateway.backend_name(), "s3");
    }

    #[tokio::test]
    async fn gateway_from_config_rejects_partial_credentials() {
        let config = ObjectStoreConfig::S3 {
            endpoint: None,
            access_key_id: None,
            secret_access_key: Some("secret".to_string()),
            ssl: false,
            region: None,
            force_path_style: false,
        };

        match gateway_from_config(&config).await {
            Ok(_) => panic!("expected error"),
            Err(StorageError::Config(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
}
