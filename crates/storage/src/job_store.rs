//! Job-scoped storage operations over categorized buckets.
//!
//! A [`JobStore`] is the only component that issues object operations. It
//! resolves each domain operation to a bucket through the [`BucketRegistry`],
//! addresses chunks and results under their job prefix, and carries chunk
//! headers as object tags.
//!
//! Construction is two-step: [`JobStore::builder`] validates configuration
//! without touching the network, and [`JobStoreBuilder::instantiate`]
//! provisions every configured bucket before handing out a ready store.

use crate::error::{Error, FailedObject, Result, StorageError};
use crate::keys;
use crate::listing::Listing;
use crate::traits::{
    ByteStream, ListOptions, ObjectBody, ObjectGateway, ObjectInfo, PutOptions, byte_stream,
};
use dgrep_core::models::base_name;
use dgrep_core::{
    BucketOptions, BucketRegistry, Chunk, ContentType, LogFile, SearchResult, StorageCategory,
    StorageOptions,
};
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, Instrument, Span, dispatcher, info_span};

/// Run `fut` unless the token fires or the deadline passes first.
async fn guard<T>(
    cancel: &CancellationToken,
    timeout: Option<Duration>,
    operation: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    let bounded = async {
        match timeout {
            Some(after) => match tokio::time::timeout(after, fut).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout { operation, after }),
            },
            None => fut.await,
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled { operation }),
        result = bounded => result,
    }
}

/// Check a bucket and create it when absent.
async fn provision(gateway: &dyn ObjectGateway, bucket: &str) -> Result<()> {
    let failed = |source: StorageError| Error::BucketProvisioningFailed {
        bucket: bucket.to_string(),
        source,
    };

    if gateway.bucket_exists(bucket).await.map_err(failed)? {
        tracing::debug!(bucket, "bucket already exists");
        return Ok(());
    }

    gateway.create_bucket(bucket).await.map_err(failed)?;
    tracing::info!(bucket, "bucket created");
    Ok(())
}

fn numeric_tag(info: &ObjectInfo, tag: &'static str, required: bool) -> Result<u64> {
    match info.tags.get(tag) {
        Some(value) => value.parse().map_err(|_| Error::CorruptMetadata {
            key: info.key.clone(),
            tag,
            value: value.clone(),
        }),
        None if required => Err(Error::CorruptMetadata {
            key: info.key.clone(),
            tag,
            value: String::new(),
        }),
        None => Ok(0),
    }
}

/// Rebuild a chunk header from the tags stored with its object.
///
/// Line tags are optional; chunks written without them read back as zero.
fn chunk_from_info(job_id: &str, chunk_id: &str, info: &ObjectInfo) -> Result<Chunk> {
    let file_name = info
        .tags
        .get(keys::TAG_FILE_NAME)
        .cloned()
        .ok_or_else(|| Error::CorruptMetadata {
            key: info.key.clone(),
            tag: keys::TAG_FILE_NAME,
            value: String::new(),
        })?;

    Ok(Chunk {
        id: chunk_id.to_string(),
        job_id: job_id.to_string(),
        file_name,
        start_byte: numeric_tag(info, keys::TAG_START_BYTE, true)?,
        end_byte: numeric_tag(info, keys::TAG_END_BYTE, true)?,
        size: info.size,
        created_at: info.last_modified.unwrap_or(OffsetDateTime::UNIX_EPOCH),
        start_line: numeric_tag(info, keys::TAG_START_LINE, false)?,
        end_line: numeric_tag(info, keys::TAG_END_LINE, false)?,
    })
}

/// Validated configuration for a [`JobStore`] whose buckets are not yet provisioned.
pub struct JobStoreBuilder {
    gateway: Arc<dyn ObjectGateway>,
    registry: BucketRegistry,
    span: Option<Span>,
    dispatch: Dispatch,
    cancel: CancellationToken,
    operation_timeout: Option<Duration>,
    delete_queue_depth: usize,
}

impl JobStoreBuilder {
    /// Parent span for every operation of the store.
    ///
    /// The span should come from the same subscriber as [`Self::dispatch`].
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Subscriber that receives the store's spans and events.
    ///
    /// Defaults to the subscriber in scope when [`JobStore::builder`] ran.
    pub fn dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Token that aborts in-flight and future operations once cancelled.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn delete_queue_depth(mut self, depth: usize) -> Self {
        self.delete_queue_depth = depth.max(1);
        self
    }

    /// Make sure every configured bucket exists, creating missing ones.
    pub async fn instantiate(self) -> Result<JobStore> {
        let Self {
            gateway,
            registry,
            span,
            dispatch,
            cancel,
            operation_timeout,
            delete_queue_depth,
        } = self;

        let span = match span {
            Some(span) => span,
            None => dispatcher::with_default(&dispatch, || info_span!("job_store")),
        };
        let instantiate = dispatcher::with_default(&dispatch, || {
            info_span!(
                parent: &span,
                "instantiate",
                backend = gateway.backend_name(),
                buckets = registry.buckets().len()
            )
        });

        guard(&cancel, operation_timeout, "instantiate", async {
            for bucket in registry.buckets() {
                provision(gateway.as_ref(), &bucket.name).await?;
            }
            Ok(())
        })
        .instrument(instantiate)
        .with_subscriber(dispatch.clone())
        .await?;

        Ok(JobStore {
            gateway,
            registry: Arc::new(registry),
            span,
            dispatch,
            cancel,
            operation_timeout,
            delete_queue_depth,
        })
    }
}

/// Storage for log files, chunks and search results.
///
/// Cloning is cheap; clones share the gateway, configuration, subscriber and
/// cancellation token.
#[derive(Clone)]
pub struct JobStore {
    gateway: Arc<dyn ObjectGateway>,
    registry: Arc<BucketRegistry>,
    span: Span,
    dispatch: Dispatch,
    cancel: CancellationToken,
    operation_timeout: Option<Duration>,
    delete_queue_depth: usize,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("backend", &self.gateway.backend_name())
            .field("registry", &self.registry)
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

impl JobStore {
    /// Validate `options` and prepare a store on top of `gateway`.
    ///
    /// No network calls are made until [`JobStoreBuilder::instantiate`].
    pub fn builder(
        gateway: Arc<dyn ObjectGateway>,
        options: &StorageOptions,
    ) -> Result<JobStoreBuilder> {
        let registry = options.validate()?;

        Ok(JobStoreBuilder {
            gateway,
            registry,
            span: None,
            dispatch: dispatcher::get_default(Dispatch::clone),
            cancel: CancellationToken::new(),
            operation_timeout: options.operation_timeout(),
            delete_queue_depth: options.delete_queue_depth.max(1),
        })
    }

    pub fn registry(&self) -> &BucketRegistry {
        &self.registry
    }

    pub fn backend_name(&self) -> &'static str {
        self.gateway.backend_name()
    }

    fn bucket(&self, category: StorageCategory) -> Result<&BucketOptions> {
        self.registry
            .resolve(category)
            .ok_or(Error::MissingBucket(category))
    }

    /// Child of the store span, registered with the store's subscriber.
    fn op_span(&self, make: impl FnOnce(&Span) -> Span) -> Span {
        dispatcher::with_default(&self.dispatch, || make(&self.span))
    }

    async fn guarded<T>(
        &self,
        operation: &'static str,
        span: Span,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        guard(&self.cancel, self.operation_timeout, operation, fut)
            .instrument(span)
            .with_subscriber(self.dispatch.clone())
            .await
    }

    /// Upload a log file under its path in the logs bucket.
    ///
    /// The payload length is discovered while streaming.
    pub async fn upload_log_file(&self, file: &LogFile, payload: ByteStream) -> Result<()> {
        let span = self.op_span(|parent| {
            info_span!(parent: parent, "upload_log_file", path = %file.path)
        });

        self.guarded("upload_log_file", span, async {
            keys::validate_log_path(&file.path)?;
            let bucket = self.bucket(StorageCategory::Logs)?;

            let uploaded_at = OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default();
            let options = PutOptions::new(bucket.content_type.mime())
                .tag(keys::TAG_UPLOADED_AT, uploaded_at);

            let written = self
                .gateway
                .put_object(&bucket.name, &file.path, payload, None, options)
                .await
                .map_err(|source| Error::UploadFailed {
                    file: file.path.clone(),
                    source,
                })?;

            tracing::info!(bucket = %bucket.name, bytes = written, "log file uploaded");
            Ok(())
        })
        .await
    }

    /// Every object in the logs bucket, as log files.
    ///
    /// Entries that fail to list are skipped and reported in the listing.
    pub async fn list_log_files(&self) -> Result<Listing<LogFile>> {
        let span = self.op_span(|parent| info_span!(parent: parent, "list_log_files"));

        self.guarded("list_log_files", span, async {
            let bucket = self.bucket(StorageCategory::Logs)?;
            let mut listing = Listing::default();

            let mut entries = self
                .gateway
                .list_objects(&bucket.name, ListOptions::recursive(""));
            while let Some(entry) = entries.next().await {
                match entry {
                    Ok(summary) => listing.push(LogFile {
                        name: base_name(&summary.key).to_string(),
                        size: summary.size,
                        updated_at: summary.last_modified.unwrap_or(OffsetDateTime::UNIX_EPOCH),
                        path: summary.key,
                    }),
                    Err(e) => {
                        tracing::warn!(
                            bucket = %bucket.name,
                            error = %e,
                            "skipping log listing entry"
                        );
                        listing.skip(None, e);
                    }
                }
            }

            tracing::debug!(
                files = listing.len(),
                skipped = listing.skipped.len(),
                "log files listed"
            );
            Ok(listing)
        })
        .await
    }

    /// Store a chunk payload of exactly `chunk.size` bytes.
    pub async fn store_chunk(&self, chunk: &Chunk, payload: ByteStream) -> Result<()> {
        let span = self.op_span(|parent| {
            info_span!(parent: parent, "store_chunk", job_id = %chunk.job_id, chunk_id = %chunk.id)
        });

        self.guarded("store_chunk", span, async {
            keys::validate_id("job id", &chunk.job_id)?;
            keys::validate_id("chunk id", &chunk.id)?;
            let bucket = self.bucket(StorageCategory::Chunks)?;
            let key = keys::chunk_key(&chunk.job_id, &chunk.id);

            let options = PutOptions::new(bucket.content_type.mime())
                .tag(keys::TAG_JOB_ID, &chunk.job_id)
                .tag(keys::TAG_CHUNK_ID, &chunk.id)
                .tag(keys::TAG_FILE_NAME, &chunk.file_name)
                .tag(keys::TAG_START_BYTE, chunk.start_byte.to_string())
                .tag(keys::TAG_END_BYTE, chunk.end_byte.to_string())
                .tag(keys::TAG_START_LINE, chunk.start_line.to_string())
                .tag(keys::TAG_END_LINE, chunk.end_line.to_string());

            self.gateway
                .put_object(&bucket.name, &key, payload, Some(chunk.size), options)
                .await
                .map_err(|source| Error::ChunkWriteFailed {
                    chunk_id: chunk.id.clone(),
                    source,
                })?;

            tracing::debug!(bucket = %bucket.name, key = %key, size = chunk.size, "chunk stored");
            Ok(())
        })
        .await
    }

    /// Open a chunk, returning its header and payload.
    ///
    /// The caller owns the body; dropping it releases the connection.
    pub async fn get_chunk(&self, job_id: &str, chunk_id: &str) -> Result<(Chunk, ObjectBody)> {
        let span = self.op_span(|parent| info_span!(parent: parent, "get_chunk", job_id, chunk_id));

        self.guarded("get_chunk", span, async {
            keys::validate_id("job id", job_id)?;
            keys::validate_id("chunk id", chunk_id)?;
            let bucket = self.bucket(StorageCategory::Chunks)?;
            let key = keys::chunk_key(job_id, chunk_id);

            let reader = match self.gateway.get_object(&bucket.name, &key).await {
                Ok(reader) => reader,
                Err(e) if e.is_not_found() => {
                    return Err(Error::ChunkNotFound {
                        job_id: job_id.to_string(),
                        chunk_id: chunk_id.to_string(),
                    });
                }
                Err(source) => {
                    return Err(Error::ChunkReadFailed {
                        job_id: job_id.to_string(),
                        chunk_id: chunk_id.to_string(),
                        source,
                    });
                }
            };

            let chunk = chunk_from_info(job_id, chunk_id, &reader.info)?;
            Ok((chunk, reader.body))
        })
        .await
    }

    /// Store a search result as a JSON document.
    pub async fn store_result(&self, result: &SearchResult) -> Result<()> {
        let span = self.op_span(|parent| {
            info_span!(
                parent: parent,
                "store_result",
                job_id = %result.job_id,
                result_id = %result.id
            )
        });

        self.guarded("store_result", span, async {
            keys::validate_id("job id", &result.job_id)?;
            keys::validate_id("result id", &result.id)?;
            let bucket = self.bucket(StorageCategory::Results)?;
            let key = keys::result_key(&result.job_id, &result.id);

            let payload = serde_json::to_vec(result).map_err(|source| Error::ResultEncodeFailed {
                result_id: result.id.clone(),
                source,
            })?;
            let size = payload.len() as u64;
            let options = PutOptions::new(ContentType::Json.mime())
                .tag(keys::TAG_JOB_ID, &result.job_id)
                .tag(keys::TAG_CHUNK_ID, &result.chunk_id);

            self.gateway
                .put_object(&bucket.name, &key, byte_stream(payload), Some(size), options)
                .await
                .map_err(|source| Error::ResultWriteFailed {
                    result_id: result.id.clone(),
                    source,
                })?;

            tracing::debug!(
                bucket = %bucket.name,
                key = %key,
                matches = result.match_count,
                "result stored"
            );
            Ok(())
        })
        .await
    }

    /// Every decodable result stored for a job.
    ///
    /// Objects that cannot be fetched or decoded are skipped and reported in
    /// the listing.
    pub async fn get_job_results(&self, job_id: &str) -> Result<Listing<SearchResult>> {
        let span = self.op_span(|parent| info_span!(parent: parent, "get_job_results", job_id));

        self.guarded("get_job_results", span, async {
            keys::validate_id("job id", job_id)?;
            let bucket = self.bucket(StorageCategory::Results)?;
            let mut listing = Listing::default();

            let mut entries = self
                .gateway
                .list_objects(&bucket.name, ListOptions::shallow(keys::job_prefix(job_id)));
            while let Some(entry) = entries.next().await {
                let summary = match entry {
                    Ok(summary) => summary,
                    Err(e) => {
                        tracing::warn!(
                            bucket = %bucket.name,
                            error = %e,
                            "skipping result listing entry"
                        );
                        listing.skip(None, e);
                        continue;
                    }
                };

                match self.read_result(&bucket.name, &summary.key).await {
                    Ok(result) if result.job_id == job_id => listing.push(result),
                    Ok(result) => {
                        tracing::warn!(
                            key = %summary.key,
                            owner = %result.job_id,
                            "skipping result of another job"
                        );
                        listing.skip(
                            Some(summary.key),
                            format!("result belongs to job {}", result.job_id),
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            key = %summary.key,
                            error = %e,
                            "skipping unreadable result"
                        );
                        listing.skip(Some(summary.key), e);
                    }
                }
            }

            tracing::debug!(
                results = listing.len(),
                skipped = listing.skipped.len(),
                "results listed"
            );
            Ok(listing)
        })
        .await
    }

    async fn read_result(
        &self,
        bucket: &str,
        key: &str,
    ) -> std::result::Result<SearchResult, Box<dyn std::error::Error + Send + Sync>> {
        let reader = self.gateway.get_object(bucket, key).await?;
        let bytes = reader.body.read_to_end().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Delete every chunk and result of a job.
    ///
    /// Both phases always run. Failures from either are collected into one
    /// [`Error::PartialDeleteFailure`]; re-running the deletion is safe.
    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        let span = self.op_span(|parent| info_span!(parent: parent, "delete_job", job_id));

        self.guarded("delete_job", span, async {
            keys::validate_id("job id", job_id)?;
            let chunks = self.bucket(StorageCategory::Chunks)?;
            let results = self.bucket(StorageCategory::Results)?;
            let prefix = keys::job_prefix(job_id);

            let mut failed = self.delete_prefix(&chunks.name, &prefix).await;
            failed.extend(self.delete_prefix(&results.name, &prefix).await);

            if failed.is_empty() {
                tracing::info!("job objects deleted");
                Ok(())
            } else {
                tracing::warn!(failed = failed.len(), "job deletion left objects behind");
                Err(Error::PartialDeleteFailure {
                    job_id: job_id.to_string(),
                    failed,
                })
            }
        })
        .await
    }

    /// Remove everything under `prefix`, listing and removing concurrently.
    ///
    /// Listed keys pass through a bounded queue to the removal side. Listing
    /// failures are reported against the prefix itself.
    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Vec<FailedObject> {
        let (mut tx, rx) = mpsc::channel::<String>(self.delete_queue_depth);

        // Owns the sender, so the queue closes whenever listing stops.
        let produce = async move {
            let mut failures = Vec::new();
            let mut entries = self
                .gateway
                .list_objects(bucket, ListOptions::recursive(prefix));

            while let Some(entry) = entries.next().await {
                match entry {
                    Ok(summary) => {
                        if tx.send(summary.key).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(
                            bucket,
                            prefix,
                            error = %error,
                            "listing failed during deletion"
                        );
                        failures.push(FailedObject {
                            bucket: bucket.to_string(),
                            key: prefix.to_string(),
                            error,
                        });
                    }
                }
            }
            failures
        };

        let consume = async move {
            let mut removed = 0usize;
            let mut failures = Vec::new();
            let mut outcomes = self.gateway.remove_objects(bucket, Box::pin(rx));

            while let Some(outcome) = outcomes.next().await {
                match outcome.error {
                    None => removed += 1,
                    Some(error) => {
                        tracing::warn!(
                            bucket,
                            key = %outcome.key,
                            error = %error,
                            "failed to remove object"
                        );
                        failures.push(FailedObject {
                            bucket: bucket.to_string(),
                            key: outcome.key,
                            error,
                        });
                    }
                }
            }
            (removed, failures)
        };

        let (mut failures, (removed, removal_failures)) = futures::join!(produce, consume);
        failures.extend(removal_failures);
        tracing::debug!(bucket, prefix, removed, failed = failures.len(), "prefix deleted");
        failures
    }

    /// Verify every configured bucket still exists.
    pub async fn health_check(&self) -> Result<()> {
        let span = self.op_span(|parent| info_span!(parent: parent, "health_check"));

        self.guarded("health_check", span, async {
            for bucket in self.registry.buckets() {
                let reason = match self.gateway.bucket_exists(&bucket.name).await {
                    Ok(true) => continue,
                    Ok(false) => "bucket does not exist".to_string(),
                    Err(e) => e.to_string(),
                };
                return Err(Error::HealthCheckFailed {
                    bucket: bucket.name.clone(),
                    reason,
                });
            }
            Ok(())
        })
        .await
    }
}
