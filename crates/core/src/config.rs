//! Configuration types shared across crates.

use crate::bucket::{BucketRegistry, BucketSpec};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Object store backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ObjectStoreConfig {
    /// Process-local store. Contents are lost on exit.
    Memory,
    /// S3-compatible storage (MinIO, AWS S3, ...).
    S3 {
        /// Endpoint, either a URL or a bare `host:port`.
        endpoint: Option<String>,
        /// Access key ID. Falls back to the ambient AWS credential chain if not set.
        /// WARNING: Prefer env vars over storing secrets in config files.
        access_key_id: Option<String>,
        /// Secret access key.
        /// WARNING: Prefer env vars over storing secrets in config files.
        secret_access_key: Option<String>,
        /// Use https for a bare `host:port` endpoint.
        #[serde(default)]
        ssl: bool,
        /// Region (default: us-east-1).
        region: Option<String>,
        /// Path-style addressing (`endpoint/bucket/key`). Required for MinIO.
        #[serde(default = "default_force_path_style")]
        force_path_style: bool,
    },
}

fn default_force_path_style() -> bool {
    true
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self::Memory
    }
}

impl ObjectStoreConfig {
    /// Validate object store configuration invariants.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            ObjectStoreConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ),
            },
            ObjectStoreConfig::Memory => Ok(()),
        }
    }
}

/// Bucket layout and operation limits for the job store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageOptions {
    /// One entry per category; the first entry for a category wins.
    #[serde(default)]
    pub buckets: Vec<BucketSpec>,
    /// Deadline for a single storage operation. `None` disables it.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: Option<u64>,
    /// Keys buffered between listing and removal while deleting a job.
    #[serde(default = "default_delete_queue_depth")]
    pub delete_queue_depth: usize,
}

fn default_operation_timeout_secs() -> Option<u64> {
    Some(300)
}

fn default_delete_queue_depth() -> usize {
    1000
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            buckets: Vec::new(),
            operation_timeout_secs: default_operation_timeout_secs(),
            delete_queue_depth: default_delete_queue_depth(),
        }
    }
}

impl StorageOptions {
    /// Options with the given buckets and default limits.
    pub fn with_buckets(buckets: Vec<BucketSpec>) -> Self {
        Self {
            buckets,
            ..Self::default()
        }
    }

    /// Validate the bucket list and limits, producing the registry.
    pub fn validate(&self) -> Result<BucketRegistry> {
        if self.delete_queue_depth == 0 {
            return Err(Error::invalid(
                "delete_queue_depth",
                "must be greater than zero",
            ));
        }
        if self.operation_timeout_secs == Some(0) {
            return Err(Error::invalid(
                "operation_timeout_secs",
                "must be greater than zero when set",
            ));
        }
        BucketRegistry::validate(&self.buckets)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }
}

/// Top-level configuration for the operator CLI.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub storage: StorageOptions,
}

impl AppConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<BucketRegistry> {
        self.object_store
            .validate()
            .map_err(|reason| Error::invalid("object_store", reason))?;
        self.storage.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::StorageCategory;

    #[test]
    fn test_storage_options_defaults() {
        let options: StorageOptions = serde_json::from_str(r#"{"buckets": []}"#).unwrap();
        assert_eq!(options.operation_timeout_secs, Some(300));
        assert_eq!(options.delete_queue_depth, 1000);
        assert_eq!(options.operation_timeout(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_storage_options_bucket_field_names() {
        let json = r#"{
            "buckets": [
                {"name": "LogStorage", "type": "text", "category": "logs"},
                {"name": "ResultStorage", "type": "application/json", "category": "RESULTS"}
            ],
            "operation_timeout_secs": null
        }"#;
        let options: StorageOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.operation_timeout(), None);

        let registry = options.validate().unwrap();
        assert_eq!(
            registry.resolve(StorageCategory::Results).unwrap().name,
            "ResultStorage"
        );
    }

    #[test]
    fn test_storage_options_rejects_zero_queue_depth() {
        let options = StorageOptions {
            delete_queue_depth: 0,
            ..StorageOptions::default()
        };
        match options.validate() {
            Err(Error::InvalidConfiguration { field, .. }) => {
                assert_eq!(field, "delete_queue_depth")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_object_store_s3_roundtrip_without_credentials() {
        let json = r#"{"type": "s3", "endpoint": "minio:9000"}"#;
        let config: ObjectStoreConfig = serde_json::from_str(json).unwrap();
        match &config {
            ObjectStoreConfig::S3 {
                endpoint,
                access_key_id,
                ssl,
                force_path_style,
                ..
            } => {
                assert_eq!(endpoint.as_deref(), Some("minio:9000"));
                assert!(access_key_id.is_none());
                assert!(!ssl);
                assert!(force_path_style);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_object_store_s3_validate_partial_credentials() {
        let config = ObjectStoreConfig::S3 {
            endpoint: None,
            access_key_id: Some("access".to_string()),
            secret_access_key: None,
            ssl: false,
            region: None,
            force_path_style: true,
        };
        assert!(config.validate().is_err());

        let app = AppConfig {
            object_store: config,
            storage: StorageOptions::default(),
        };
        assert!(matches!(
            app.validate(),
            Err(Error::InvalidConfiguration { field, .. }) if field == "object_store"
        ));
    }

    #[test]
    fn test_app_config_defaults_to_memory() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert!(matches!(config.object_store, ObjectStoreConfig::Memory));
        assert!(config.storage.buckets.is_empty());
    }
}
