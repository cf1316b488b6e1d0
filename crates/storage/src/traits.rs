//! Object gateway trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use time::OffsetDateTime;

/// A boxed stream of bytes for streaming reads and writes.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// A stream of object keys handed to a bulk removal.
pub type KeyStream<'a> = Pin<Box<dyn Stream<Item = String> + Send + 'a>>;

/// A listing; errors are yielded inline and do not end the sequence.
pub type ObjectListing<'a> = Pin<Box<dyn Stream<Item = StorageResult<ObjectSummary>> + Send + 'a>>;

/// Per-key outcomes of a bulk removal.
pub type RemovalStream<'a> = Pin<Box<dyn Stream<Item = RemoveOutcome> + Send + 'a>>;

/// Wrap an in-memory payload as a single-item byte stream.
pub fn byte_stream(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Options attached to a written object.
#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    pub content_type: String,
    /// String tags stored alongside the payload.
    pub tags: BTreeMap<String, String>,
}

impl PutOptions {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            tags: BTreeMap::new(),
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Options for listing a bucket.
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    /// Only return keys starting with this prefix.
    pub prefix: String,
    /// Descend past the next `/` after the prefix.
    pub recursive: bool,
}

impl ListOptions {
    pub fn recursive(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            recursive: true,
        }
    }

    pub fn shallow(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            recursive: false,
        }
    }
}

/// One entry of a listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<OffsetDateTime>,
}

/// Metadata about a stored object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    pub last_modified: Option<OffsetDateTime>,
    pub content_type: Option<String>,
    pub tags: BTreeMap<String, String>,
}

/// Outcome of removing a single key.
#[derive(Debug)]
pub struct RemoveOutcome {
    pub key: String,
    pub error: Option<StorageError>,
}

impl RemoveOutcome {
    pub fn removed(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            error: None,
        }
    }

    pub fn failed(key: impl Into<String>, error: StorageError) -> Self {
        Self {
            key: key.into(),
            error: Some(error),
        }
    }
}

/// Payload of an object being read.
///
/// Dropping the body releases the underlying connection, so every exit
/// path of the reader releases it.
pub struct ObjectBody {
    inner: ByteStream,
}

impl ObjectBody {
    pub fn new(inner: ByteStream) -> Self {
        Self { inner }
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::new(byte_stream(data))
    }

    /// Drain the body into memory.
    pub async fn read_to_end(mut self) -> StorageResult<Bytes> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.inner.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }

    pub fn into_stream(self) -> ByteStream {
        self.inner
    }
}

impl Stream for ObjectBody {
    type Item = StorageResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBody").finish_non_exhaustive()
    }
}

/// An opened object: metadata plus payload stream.
#[derive(Debug)]
pub struct ObjectReader {
    pub info: ObjectInfo,
    pub body: ObjectBody,
}

/// Bucket/object store consumed by the job store.
#[async_trait]
pub trait ObjectGateway: Send + Sync + 'static {
    /// Check if a bucket exists.
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool>;

    /// Create a bucket. Creating a bucket that is already owned succeeds.
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Write an object, returning the number of bytes stored.
    ///
    /// With `size` set the payload must be exactly that long. With `None`
    /// the length is discovered while streaming.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        size: Option<u64>,
        options: PutOptions,
    ) -> StorageResult<u64>;

    /// Fetch an object's metadata without its payload.
    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo>;

    /// Open an object for reading.
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectReader>;

    /// List objects lazily.
    ///
    /// The sequence is finite and cannot be restarted part way. A failure on
    /// one entry is yielded in place; a failure to fetch further entries is
    /// yielded once and ends the listing.
    fn list_objects<'a>(&'a self, bucket: &str, options: ListOptions) -> ObjectListing<'a>;

    /// Remove every key produced by `keys`.
    ///
    /// Keys are pulled as the removal progresses, so the caller may still be
    /// producing them. Removing a missing key succeeds.
    fn remove_objects<'a>(&'a self, bucket: &str, keys: KeyStream<'a>) -> RemovalStream<'a>;

    /// Static identifier of the backend, used in logs.
    fn backend_name(&self) -> &'static str;
}
