//! S3-compatible object gateway using the AWS SDK.
//!
//! Works against AWS S3 and MinIO. Object tags are carried as S3 user
//! metadata (`x-amz-meta-*`), so they come back on both `HeadObject` and
//! `GetObject` without a second request.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    ByteStream, KeyStream, ListOptions, ObjectBody, ObjectGateway, ObjectInfo, ObjectListing,
    ObjectReader, ObjectSummary, PutOptions, RemovalStream, RemoveOutcome,
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
    Delete, ObjectIdentifier,
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use time::OffsetDateTime;
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Minimum part size for S3 multipart uploads (5 MiB).
/// S3 requires all parts except the last to be at least 5 MB.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Maximum number of keys accepted by a single `DeleteObjects` call.
const DELETE_BATCH_SIZE: usize = 1000;

const DEFAULT_REGION: &str = "us-east-1";

/// Convert an AWS SDK error to StorageError, mapping 404s to typed absences.
fn map_sdk_error<E>(err: SdkError<E>, bucket: &str, key: Option<&str>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    if let SdkError::ServiceError(ref service_err) = err {
        if service_err.err().code() == Some("NoSuchBucket") {
            return StorageError::BucketNotFound(bucket.to_string());
        }
        if service_err.raw().status().as_u16() == 404 {
            return match key {
                Some(key) => StorageError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                },
                None => StorageError::BucketNotFound(bucket.to_string()),
            };
        }
    }
    StorageError::S3(Box::new(err))
}

fn is_not_found<E>(err: &SdkError<E>) -> bool {
    matches!(err, SdkError::ServiceError(service_err) if service_err.raw().status().as_u16() == 404)
}

fn to_offset_datetime(dt: &aws_sdk_s3::primitives::DateTime) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(dt.secs())
        .inspect_err(|e| {
            tracing::warn!(timestamp = dt.secs(), error = %e, "Failed to convert S3 timestamp");
        })
        .ok()
}

fn to_tags(metadata: Option<&HashMap<String, String>>) -> BTreeMap<String, String> {
    metadata
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

/// Prepend a scheme to bare `host:port` endpoints.
fn normalize_endpoint(endpoint: &str, ssl: bool) -> String {
    let endpoint_lower = endpoint.to_ascii_lowercase();
    if endpoint_lower.starts_with("http://") || endpoint_lower.starts_with("https://") {
        endpoint.to_string()
    } else if ssl {
        format!("https://{endpoint}")
    } else {
        format!("http://{endpoint}")
    }
}

/// S3-compatible object gateway.
pub struct S3Gateway {
    client: Client,
    /// Normalized endpoint, for logs.
    endpoint: String,
    region: String,
}

impl std::fmt::Debug for S3Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Gateway")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3Gateway {
    /// Create a new S3 gateway.
    ///
    /// # Arguments
    /// * `ssl` - Scheme used when `endpoint` is a bare `host:port`.
    /// * `force_path_style` - Use path-style URLs (`endpoint/bucket/key`) instead of
    ///   virtual-hosted style (`bucket.endpoint/key`). Required for MinIO.
    pub async fn new(
        endpoint: Option<String>,
        ssl: bool,
        region: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        if access_key_id.is_some() ^ secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let resolved_region = region.unwrap_or_else(|| DEFAULT_REGION.to_string());
        let region_value = aws_config::Region::new(resolved_region.clone());

        let mut s3_config_builder =
            if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
                let credentials = aws_sdk_s3::config::Credentials::new(
                    key_id,
                    secret,
                    None, // session token
                    None, // expiration
                    "dgrep-config",
                );
                aws_sdk_s3::config::Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .region(region_value)
                    .credentials_provider(credentials)
            } else {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(region_value)
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            };

        let normalized_endpoint = endpoint.as_deref().map(|e| normalize_endpoint(e, ssl));
        if let Some(endpoint_url) = &normalized_endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }
        if force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        Ok(Self {
            client,
            endpoint: normalized_endpoint
                .unwrap_or_else(|| format!("s3.{resolved_region}.amazonaws.com")),
            region: resolved_region,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn put_buffered(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(&options.content_type)
            .content_length(data.len() as i64)
            .set_metadata(Some(options.tags.clone().into_iter().collect()))
            .body(data.into())
            .send()
            .await
            .map_err(|e| map_sdk_error(e, bucket, None))?;
        Ok(())
    }

    /// Stream an upload of unknown length.
    ///
    /// Payloads shorter than one part go out as a single `PutObject`; longer
    /// ones switch to a multipart upload once the first part is full.
    async fn put_streaming(
        &self,
        bucket: &str,
        key: &str,
        mut body: ByteStream,
        options: &PutOptions,
    ) -> StorageResult<u64> {
        let mut buffer = BytesMut::with_capacity(MIN_PART_SIZE);
        let mut upload: Option<MultipartUpload> = None;
        let mut total: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    if let Some(upload) = upload.take() {
                        upload.abort().await;
                    }
                    return Err(e);
                }
            };
            total += chunk.len() as u64;
            buffer.extend_from_slice(&chunk);

            while buffer.len() >= MIN_PART_SIZE {
                if upload.is_none() {
                    let started = MultipartUpload::start(&self.client, bucket, key, options).await?;
                    upload = Some(started);
                }
                let part = buffer.split_to(MIN_PART_SIZE).freeze();
                let sent = match upload.as_mut() {
                    Some(active) => active.upload_part(part).await,
                    None => Ok(()),
                };
                if let Err(e) = sent {
                    if let Some(upload) = upload.take() {
                        upload.abort().await;
                    }
                    return Err(e);
                }
            }
        }

        match upload {
            None => {
                self.put_buffered(bucket, key, buffer.freeze(), options).await?;
            }
            Some(mut active) => {
                if !buffer.is_empty() {
                    let sent = active.upload_part(buffer.freeze()).await;
                    if let Err(e) = sent {
                        active.abort().await;
                        return Err(e);
                    }
                }
                active.complete().await?;
            }
        }

        Ok(total)
    }
}

#[async_trait]
impl ObjectGateway for S3Gateway {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(StorageError::S3(Box::new(err))),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut request = self.client.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit location constraint.
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_bucket_already_owned_by_you()) =>
            {
                Ok(())
            }
            Err(err) => Err(StorageError::S3(Box::new(err))),
        }
    }

    #[instrument(skip(self, body, options), fields(backend = "s3"))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        mut body: ByteStream,
        size: Option<u64>,
        options: PutOptions,
    ) -> StorageResult<u64> {
        let Some(declared) = size else {
            return self.put_streaming(bucket, key, body, &options).await;
        };

        let capacity = usize::try_from(declared).unwrap_or(usize::MAX).min(MIN_PART_SIZE);
        let mut buffer = BytesMut::with_capacity(capacity);
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
            if buffer.len() as u64 > declared {
                break;
            }
        }
        let actual = buffer.len() as u64;
        if actual != declared {
            return Err(StorageError::SizeMismatch {
                key: key.to_string(),
                declared,
                actual,
            });
        }

        self.put_buffered(bucket, key, buffer.freeze(), &options).await?;
        Ok(actual)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, bucket, Some(key)))?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size: output.content_length().unwrap_or(0) as u64,
            last_modified: output.last_modified().and_then(to_offset_datetime),
            content_type: output.content_type().map(|s| s.to_string()),
            tags: to_tags(output.metadata()),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectReader> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, bucket, Some(key)))?;

        let info = ObjectInfo {
            key: key.to_string(),
            size: output.content_length().unwrap_or(0) as u64,
            last_modified: output.last_modified().and_then(to_offset_datetime),
            content_type: output.content_type().map(|s| s.to_string()),
            tags: to_tags(output.metadata()),
        };

        // Convert AWS ByteStream to AsyncRead, then wrap with ReaderStream for true streaming
        let reader_stream = ReaderStream::new(output.body.into_async_read());
        let stream = reader_stream.map(|result| result.map_err(StorageError::Io));

        Ok(ObjectReader {
            info,
            body: ObjectBody::new(Box::pin(stream)),
        })
    }

    fn list_objects<'a>(&'a self, bucket: &str, options: ListOptions) -> ObjectListing<'a> {
        let bucket = bucket.to_string();

        Box::pin(async_stream::stream! {
            let mut continuation_token: Option<String> = None;

            loop {
                let mut request = self
                    .client
                    .list_objects_v2()
                    .bucket(&bucket)
                    .prefix(&options.prefix);

                if !options.recursive {
                    request = request.delimiter("/");
                }
                if let Some(token) = continuation_token.take() {
                    request = request.continuation_token(token);
                }

                let output = match request.send().await {
                    Ok(output) => output,
                    Err(e) => {
                        yield Err(map_sdk_error(e, &bucket, None));
                        break;
                    }
                };

                for obj in output.contents() {
                    match obj.key() {
                        Some(key) => yield Ok(ObjectSummary {
                            key: key.to_string(),
                            size: obj.size().unwrap_or(0).max(0) as u64,
                            last_modified: obj.last_modified().and_then(to_offset_datetime),
                        }),
                        None => yield Err(StorageError::InvalidKey(
                            "listing entry without a key".to_string(),
                        )),
                    }
                }

                match output.next_continuation_token() {
                    Some(token) if output.is_truncated() == Some(true) => {
                        continuation_token = Some(token.to_string());
                    }
                    _ => break,
                }
            }
        })
    }

    fn remove_objects<'a>(&'a self, bucket: &str, keys: KeyStream<'a>) -> RemovalStream<'a> {
        let bucket = bucket.to_string();

        Box::pin(async_stream::stream! {
            // Take whatever keys are ready, so removal starts before listing ends.
            let mut batches = keys.ready_chunks(DELETE_BATCH_SIZE);

            while let Some(batch) = batches.next().await {
                let mut identifiers = Vec::with_capacity(batch.len());
                for key in &batch {
                    match ObjectIdentifier::builder().key(key).build() {
                        Ok(id) => identifiers.push(id),
                        Err(e) => yield RemoveOutcome::failed(
                            key.clone(),
                            StorageError::InvalidKey(e.to_string()),
                        ),
                    }
                }
                if identifiers.is_empty() {
                    continue;
                }

                let delete = match Delete::builder()
                    .set_objects(Some(identifiers))
                    .quiet(false)
                    .build()
                {
                    Ok(delete) => delete,
                    Err(e) => {
                        for key in batch {
                            yield RemoveOutcome::failed(key, StorageError::Config(e.to_string()));
                        }
                        continue;
                    }
                };

                match self
                    .client
                    .delete_objects()
                    .bucket(&bucket)
                    .delete(delete)
                    .send()
                    .await
                {
                    Ok(output) => {
                        for deleted in output.deleted() {
                            if let Some(key) = deleted.key() {
                                yield RemoveOutcome::removed(key);
                            }
                        }
                        for failure in output.errors() {
                            let key = failure.key().unwrap_or_default().to_string();
                            let message = format!(
                                "{}: {}",
                                failure.code().unwrap_or("Unknown"),
                                failure.message().unwrap_or_default()
                            );
                            yield RemoveOutcome::failed(
                                key.clone(),
                                StorageError::Rejected { key, message },
                            );
                        }
                    }
                    Err(e) => {
                        let message = e.to_string();
                        for key in batch {
                            yield RemoveOutcome::failed(
                                key.clone(),
                                StorageError::Rejected { key, message: message.clone() },
                            );
                        }
                    }
                }
            }
        })
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

/// An in-progress multipart upload.
struct MultipartUpload {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    parts: Vec<CompletedPart>,
    part_number: i32,
}

impl MultipartUpload {
    async fn start(
        client: &Client,
        bucket: &str,
        key: &str,
        options: &PutOptions,
    ) -> StorageResult<Self> {
        let create_output = client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(&options.content_type)
            .set_metadata(Some(options.tags.clone().into_iter().collect()))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, bucket, None))?;

        let upload_id = create_output
            .upload_id()
            .ok_or_else(|| StorageError::Config("S3 did not return upload_id".to_string()))?
            .to_string();

        Ok(Self {
            client: client.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
            parts: Vec::new(),
            part_number: 1,
        })
    }

    /// Upload a single part to S3 and track it.
    async fn upload_part(&mut self, data: Bytes) -> StorageResult<()> {
        let upload_output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(self.part_number)
            .body(data.into())
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &self.bucket, None))?;

        let completed_part = CompletedPart::builder()
            .e_tag(upload_output.e_tag().unwrap_or_default())
            .part_number(self.part_number)
            .build();

        self.parts.push(completed_part);
        self.part_number += 1;

        Ok(())
    }

    async fn complete(self) -> StorageResult<()> {
        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(self.parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &self.bucket, None))?;

        Ok(())
    }

    /// Best-effort cleanup of uploaded parts.
    async fn abort(self) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await
        {
            tracing::warn!(
                key = %self.key,
                upload_id = %self.upload_id,
                error = %e,
                "Failed to abort multipart upload, orphaned parts may remain"
            );
        }
    }
}
