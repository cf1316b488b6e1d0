use async_trait::async_trait;
use dgrep_storage::{
    ByteStream, KeyStream, ListOptions, MemoryGateway, ObjectGateway, ObjectInfo, ObjectReader,
    PutOptions, RemoveOutcome, StorageError, StorageResult,
};
use dgrep_storage::traits::{ObjectListing, RemovalStream};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

fn injected(what: &str) -> StorageError {
    StorageError::Io(std::io::Error::other(format!("injected {what} failure")))
}

/// Memory gateway that fails chosen operations.
///
/// Faults are keyed by object key or bucket name and stay armed until the
/// matching `heal_*` call.
#[allow(dead_code)]
#[derive(Default)]
pub struct FaultyGateway {
    inner: MemoryGateway,
    failing_removals: Mutex<HashSet<String>>,
    failing_reads: Mutex<HashSet<String>>,
    broken_listings: Mutex<HashSet<String>>,
    broken_buckets: Mutex<HashSet<String>>,
    stall_puts: AtomicBool,
    stall_removals: AtomicBool,
    /// Keys handed to `remove_objects`, failing or not.
    pub removal_requests: AtomicUsize,
}

#[allow(dead_code)]
impl FaultyGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryGateway {
        &self.inner
    }

    pub fn fail_removal_of(&self, key: &str) {
        self.failing_removals.lock().unwrap().insert(key.to_string());
    }

    pub fn heal_removals(&self) {
        self.failing_removals.lock().unwrap().clear();
    }

    pub fn fail_read_of(&self, key: &str) {
        self.failing_reads.lock().unwrap().insert(key.to_string());
    }

    /// Listings of `bucket` end with an error after their entries.
    pub fn break_listing_of(&self, bucket: &str) {
        self.broken_listings.lock().unwrap().insert(bucket.to_string());
    }

    /// Existence checks on `bucket` fail.
    pub fn break_bucket(&self, bucket: &str) {
        self.broken_buckets.lock().unwrap().insert(bucket.to_string());
    }

    /// Writes never complete.
    pub fn stall_puts(&self) {
        self.stall_puts.store(true, Ordering::SeqCst);
    }

    /// Removal streams never yield and never pull keys.
    pub fn stall_removals(&self) {
        self.stall_removals.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectGateway for FaultyGateway {
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        if self.broken_buckets.lock().unwrap().contains(bucket) {
            return Err(injected("bucket check"));
        }
        self.inner.bucket_exists(bucket).await
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.inner.create_bucket(bucket).await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        size: Option<u64>,
        options: PutOptions,
    ) -> StorageResult<u64> {
        if self.stall_puts.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        self.inner.put_object(bucket, key, body, size, options).await
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        self.inner.stat_object(bucket, key).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectReader> {
        if self.failing_reads.lock().unwrap().contains(key) {
            return Err(injected("read"));
        }
        self.inner.get_object(bucket, key).await
    }

    fn list_objects<'a>(&'a self, bucket: &str, options: ListOptions) -> ObjectListing<'a> {
        let broken = self.broken_listings.lock().unwrap().contains(bucket);
        let mut entries = self.inner.list_objects(bucket, options);

        Box::pin(async_stream::stream! {
            while let Some(entry) = entries.next().await {
                yield entry;
            }
            if broken {
                yield Err(injected("listing"));
            }
        })
    }

    fn remove_objects<'a>(&'a self, bucket: &str, mut keys: KeyStream<'a>) -> RemovalStream<'a> {
        if self.stall_removals.load(Ordering::SeqCst) {
            return Box::pin(futures::stream::pending::<RemoveOutcome>());
        }
        let bucket = bucket.to_string();

        Box::pin(async_stream::stream! {
            while let Some(key) = keys.next().await {
                self.removal_requests.fetch_add(1, Ordering::SeqCst);
                let failing = self.failing_removals.lock().unwrap().contains(&key);
                if failing {
                    yield RemoveOutcome::failed(
                        key.clone(),
                        StorageError::Rejected { key, message: "AccessDenied".to_string() },
                    );
                    continue;
                }

                let single: KeyStream<'a> = Box::pin(futures::stream::iter([key]));
                let mut outcomes = self.inner.remove_objects(&bucket, single);
                while let Some(outcome) = outcomes.next().await {
                    yield outcome;
                }
            }
        })
    }

    fn backend_name(&self) -> &'static str {
        "faulty-memory"
    }
}
