//! In-process object store.
//!
//! Holds every bucket in memory behind a lock. Listing order is lexicographic
//! by key, and a listing works from a snapshot taken when it starts.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    ByteStream, KeyStream, ListOptions, ObjectBody, ObjectGateway, ObjectInfo, ObjectListing,
    ObjectReader, ObjectSummary, PutOptions, RemovalStream, RemoveOutcome,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use time::OffsetDateTime;
use tracing::instrument;

#[derive(Clone, Debug)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    tags: BTreeMap<String, String>,
    last_modified: OffsetDateTime,
}

type Bucket = BTreeMap<String, StoredObject>;

/// Object store kept entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently held in a bucket.
    pub fn object_count(&self, bucket: &str) -> usize {
        self.read(|buckets| buckets.get(bucket).map_or(0, |b| b.len()))
    }

    fn read<R>(&self, f: impl FnOnce(&HashMap<String, Bucket>) -> R) -> R {
        let guard = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut HashMap<String, Bucket>) -> R) -> R {
        let mut guard = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn info(key: &str, object: &StoredObject) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size: object.data.len() as u64,
            last_modified: Some(object.last_modified),
            content_type: Some(object.content_type.clone()),
            tags: object.tags.clone(),
        }
    }

    /// Snapshot the entries a listing will yield.
    fn snapshot(&self, bucket: &str, options: &ListOptions) -> StorageResult<Vec<ObjectSummary>> {
        self.read(|buckets| {
            let objects = buckets
                .get(bucket)
                .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;

            Ok(objects
                .range(options.prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&options.prefix))
                .filter(|(key, _)| options.recursive || !key[options.prefix.len()..].contains('/'))
                .map(|(key, object)| ObjectSummary {
                    key: key.clone(),
                    size: object.data.len() as u64,
                    last_modified: Some(object.last_modified),
                })
                .collect())
        })
    }
}

#[async_trait]
impl ObjectGateway for MemoryGateway {
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        Ok(self.read(|buckets| buckets.contains_key(bucket)))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.write(|buckets| {
            buckets.entry(bucket.to_string()).or_default();
        });
        Ok(())
    }

    #[instrument(skip(self, body, options), fields(backend = "memory"))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        mut body: ByteStream,
        size: Option<u64>,
        options: PutOptions,
    ) -> StorageResult<u64> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty key".to_string()));
        }
        if !self.bucket_exists(bucket).await? {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }

        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        let actual = buffer.len() as u64;
        if let Some(declared) = size
            && declared != actual
        {
            return Err(StorageError::SizeMismatch {
                key: key.to_string(),
                declared,
                actual,
            });
        }

        let object = StoredObject {
            data: buffer.freeze(),
            content_type: options.content_type,
            tags: options.tags,
            last_modified: OffsetDateTime::now_utc(),
        };

        self.write(|buckets| match buckets.get_mut(bucket) {
            Some(objects) => {
                objects.insert(key.to_string(), object);
                Ok(actual)
            }
            None => Err(StorageError::BucketNotFound(bucket.to_string())),
        })
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        self.read(|buckets| {
            let objects = buckets
                .get(bucket)
                .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
            objects
                .get(key)
                .map(|object| Self::info(key, object))
                .ok_or_else(|| StorageError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
        })
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectReader> {
        let (info, data) = self.read(|buckets| {
            let objects = buckets
                .get(bucket)
                .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
            objects
                .get(key)
                .map(|object| (Self::info(key, object), object.data.clone()))
                .ok_or_else(|| StorageError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
        })?;

        Ok(ObjectReader {
            info,
            body: ObjectBody::from_bytes(data),
        })
    }

    fn list_objects<'a>(&'a self, bucket: &str, options: ListOptions) -> ObjectListing<'a> {
        let snapshot = self.snapshot(bucket, &options);

        Box::pin(async_stream::stream! {
            match snapshot {
                Ok(entries) => {
                    for entry in entries {
                        yield Ok(entry);
                    }
                }
                Err(e) => yield Err(e),
            }
        })
    }

    fn remove_objects<'a>(&'a self, bucket: &str, mut keys: KeyStream<'a>) -> RemovalStream<'a> {
        let bucket = bucket.to_string();

        Box::pin(async_stream::stream! {
            while let Some(key) = keys.next().await {
                let removed = self.write(|buckets| match buckets.get_mut(&bucket) {
                    Some(objects) => {
                        objects.remove(&key);
                        Ok(())
                    }
                    None => Err(StorageError::BucketNotFound(bucket.clone())),
                });

                yield match removed {
                    Ok(()) => RemoveOutcome::removed(key),
                    Err(e) => RemoveOutcome::failed(key, e),
                };
            }
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
