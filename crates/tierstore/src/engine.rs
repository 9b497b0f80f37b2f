//! The transfer engine: single-shot and multipart transfers over the
//! connection pool and the endpoint-fallback wrapper.
//!
//! The engine performs remote I/O only; gates, validation, and the
//! breaker/retry envelope around whole operations live in the backend. The
//! exception is parts of a multipart upload, which carry their own retry
//! budget so one flaky part does not restart the entire upload.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use tierstore_client::{ClientError, CompletedPart, EndpointManager, ObjectStoreClient};
use tierstore_core::{ByteRange, ErrorCode, ObjectMetadata, StorageError};
use tierstore_multipart::{MultipartManager, MultipartUploadState};
use tierstore_pool::{ClientPool, HandleFactory, PoolError};
use tierstore_retry::{RetryError, Retryer};

use crate::metrics::MetricsAggregator;

/// Remote-store hard limit on parts per upload.
pub const MAX_PARTS: u64 = 10_000;
/// Smallest part the remote store accepts (except the last).
pub const MIN_CHUNK_SIZE: u64 = 5 * 1024 * 1024;
/// Largest single part.
pub const MAX_CHUNK_SIZE: u64 = 5 * 1024 * 1024 * 1024;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Errors produced by the transfer engine.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// One or more parts failed after exhausting their retry budget.
    #[error("multipart upload failed at part {first_failed_part} of {total_parts}: {message}")]
    MultipartFailed {
        first_failed_part: u32,
        total_parts: u32,
        message: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl TransferError {
    /// Whether the error is worth retrying at the operation level.
    /// Multipart composites are not: their parts already retried.
    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::Client(e) => e.is_transient(),
            TransferError::Pool(PoolError::Timeout) => true,
            TransferError::Pool(_) => false,
            TransferError::MultipartFailed { .. } | TransferError::Cancelled => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TransferError::Client(e) if e.is_not_found())
    }

    /// Translates into the unified error with context attached.
    pub fn into_storage_error(
        self,
        operation: &'static str,
        bucket: &str,
        key: &str,
    ) -> StorageError {
        match self {
            TransferError::Client(e) => e.into_storage_error(operation, bucket, key),
            TransferError::MultipartFailed { .. } => {
                StorageError::new(ErrorCode::NetworkError, self.to_string())
                    .component("transfer")
                    .operation(operation)
                    .context("bucket", bucket)
                    .context("key", key)
            }
            TransferError::Cancelled => {
                StorageError::new(ErrorCode::OperationTimeout, "operation cancelled")
                    .component("transfer")
                    .operation(operation)
                    .context("bucket", bucket)
                    .context("key", key)
            }
            TransferError::Pool(PoolError::Timeout) => {
                StorageError::new(ErrorCode::OperationTimeout, self.to_string())
                    .component("pool")
                    .operation(operation)
                    .context("bucket", bucket)
            }
            TransferError::Pool(e) => StorageError::new(ErrorCode::ServiceUnavailable, e.to_string())
                .component("pool")
                .operation(operation)
                .context("bucket", bucket),
        }
    }
}

/// Builds pooled client handles and probes them against the bucket.
pub struct ClientFactory {
    bucket: String,
    make: Box<dyn Fn() -> Arc<dyn ObjectStoreClient> + Send + Sync>,
}

impl ClientFactory {
    pub fn new<F>(bucket: impl Into<String>, make: F) -> Self
    where
        F: Fn() -> Arc<dyn ObjectStoreClient> + Send + Sync + 'static,
    {
        Self {
            bucket: bucket.into(),
            make: Box::new(make),
        }
    }

    /// A factory handing out clones of one shared client.
    pub fn shared(bucket: impl Into<String>, client: Arc<dyn ObjectStoreClient>) -> Self {
        Self::new(bucket, move || Arc::clone(&client))
    }
}

#[async_trait::async_trait]
impl HandleFactory for ClientFactory {
    type Handle = Arc<dyn ObjectStoreClient>;

    async fn create(&self) -> Result<Self::Handle, PoolError> {
        Ok((self.make)())
    }

    async fn probe(&self, handle: &Self::Handle) -> bool {
        handle.head_bucket(&self.bucket).await.is_ok()
    }
}

/// Multipart tuning resolved from configuration.
#[derive(Debug, Clone, Copy)]
pub struct MultipartSettings {
    pub threshold: u64,
    pub chunk_size: u64,
    pub concurrency: usize,
}

pub struct TransferEngine {
    bucket: String,
    pool: Arc<ClientPool<ClientFactory>>,
    endpoints: Arc<EndpointManager>,
    multipart: Arc<MultipartManager>,
    metrics: Arc<MetricsAggregator>,
    part_retryer: Retryer<TransferError>,
    settings: MultipartSettings,
}

impl TransferEngine {
    pub fn new(
        bucket: impl Into<String>,
        pool: Arc<ClientPool<ClientFactory>>,
        endpoints: Arc<EndpointManager>,
        multipart: Arc<MultipartManager>,
        metrics: Arc<MetricsAggregator>,
        part_retryer: Retryer<TransferError>,
        settings: MultipartSettings,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            pool,
            endpoints,
            multipart,
            metrics,
            part_retryer,
            settings,
        }
    }

    /// See [`chunk_size_policy`].
    pub fn chunk_size_for(&self, total_size: u64) -> u64 {
        chunk_size_policy(self.settings.chunk_size, total_size)
    }

    /// One remote call: pool handle for the duration of the call, routed
    /// through the endpoint-fallback wrapper. Returns the value and whether
    /// the accelerated endpoint served it.
    async fn call_remote<T, F, Fut>(
        &self,
        operation: &'static str,
        f: F,
    ) -> Result<(T, bool), TransferError>
    where
        F: Fn(Arc<dyn ObjectStoreClient>) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let guard = self.pool.acquire().await?;
        let standard = Arc::clone(&*guard);

        let fallbacks_before = self.endpoints.fallback_count();
        let start = Instant::now();
        let (result, accelerated) = self.endpoints.execute(operation, standard, f).await;
        let latency = start.elapsed();
        drop(guard);

        if self.endpoints.fallback_count() > fallbacks_before {
            self.metrics.record_fallback();
        }
        if accelerated && result.is_ok() {
            self.metrics.record_accelerated_request(latency);
        }
        result.map(|v| (v, accelerated)).map_err(TransferError::Client)
    }

    /// Fetches an object or a byte range of it.
    pub async fn get(&self, key: &str, offset: u64, length: u64) -> Result<Bytes, TransferError> {
        let range = ByteRange::from_offset_length(offset, length);
        let (data, accelerated) = self
            .call_remote("get_object", |client| {
                let bucket = self.bucket.clone();
                let key = key.to_string();
                async move { client.get_object(&bucket, &key, range).await }
            })
            .await?;
        self.metrics.add_bytes_downloaded(data.len() as u64);
        if accelerated {
            self.metrics.add_accelerated_bytes(data.len() as u64);
        }
        Ok(data)
    }

    /// Stores an object under the given storage class, taking the multipart
    /// path at or above the configured threshold.
    pub async fn put(
        &self,
        key: &str,
        data: Bytes,
        storage_class: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let size = data.len() as u64;
        if size >= self.settings.threshold {
            return self.put_multipart(key, data, storage_class, cancel).await;
        }

        let (_, accelerated) = self
            .call_remote("put_object", |client| {
                let bucket = self.bucket.clone();
                let key = key.to_string();
                let body = data.clone();
                async move {
                    client
                        .put_object(&bucket, &key, body, DEFAULT_CONTENT_TYPE, storage_class)
                        .await
                }
            })
            .await?;
        self.metrics.add_bytes_uploaded(size);
        if accelerated {
            self.metrics.add_accelerated_bytes(size);
        }
        Ok(())
    }

    async fn put_multipart(
        &self,
        key: &str,
        data: Bytes,
        storage_class: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let total_size = data.len() as u64;
        let chunk = self.chunk_size_for(total_size);
        let total_parts = total_size.div_ceil(chunk) as u32;
        let start = Instant::now();

        let (upload_id, _) = self
            .call_remote("create_multipart_upload", |client| {
                let bucket = self.bucket.clone();
                let key = key.to_string();
                let storage_class = storage_class.to_string();
                async move {
                    client
                        .create_multipart_upload(&bucket, &key, DEFAULT_CONTENT_TYPE, &storage_class)
                        .await
                }
            })
            .await?;

        self.multipart.track(MultipartUploadState::new(
            &upload_id,
            &self.bucket,
            key,
            total_size,
            chunk,
            total_parts,
        ));
        self.metrics.record_multipart_started();
        tracing::debug!(
            key,
            upload_id = %upload_id,
            parts = total_parts,
            chunk_size = chunk,
            "starting multipart upload"
        );

        let results: Vec<Result<CompletedPart, (u32, TransferError)>> =
            stream::iter(1..=total_parts)
                .map(|part_number| {
                    let slice = part_slice(&data, chunk, part_number, total_size);
                    let upload_id = upload_id.clone();
                    async move {
                        self.upload_one_part(key, &upload_id, part_number, slice, cancel)
                            .await
                    }
                })
                .buffer_unordered(self.settings.concurrency)
                .collect()
                .await;

        let mut completed = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(part) => completed.push(part),
                Err(failure) => failures.push(failure),
            }
        }

        if !failures.is_empty() {
            failures.sort_by_key(|(part_number, _)| *part_number);
            let (first_failed_part, first_error) = &failures[0];
            tracing::warn!(
                key,
                upload_id = %upload_id,
                failed_parts = failures.len(),
                "aborting multipart upload after part failures"
            );
            // Best-effort abort; its failure is logged and swallowed.
            if let Err(abort_err) = self
                .call_remote("abort_multipart_upload", |client| {
                    let bucket = self.bucket.clone();
                    let key = key.to_string();
                    let upload_id = upload_id.clone();
                    async move { client.abort_multipart_upload(&bucket, &key, &upload_id).await }
                })
                .await
            {
                tracing::warn!(
                    upload_id = %upload_id,
                    error = %abort_err,
                    "failed to abort multipart upload"
                );
            }
            self.multipart.mark_failed(&upload_id);
            self.metrics.record_multipart_failed();
            return Err(TransferError::MultipartFailed {
                first_failed_part: *first_failed_part,
                total_parts,
                message: first_error.to_string(),
            });
        }

        completed.sort_by_key(|part| part.part_number);
        let complete_result = self
            .call_remote("complete_multipart_upload", |client| {
                let bucket = self.bucket.clone();
                let key = key.to_string();
                let upload_id = upload_id.clone();
                let parts = completed.clone();
                async move {
                    client
                        .complete_multipart_upload(&bucket, &key, &upload_id, &parts)
                        .await
                }
            })
            .await;
        if let Err(err) = complete_result {
            self.multipart.mark_failed(&upload_id);
            self.metrics.record_multipart_failed();
            return Err(err);
        }

        // Terminal states linger for progress inspection; cleanup reaps them.
        self.multipart.mark_completed(&upload_id);
        self.metrics.record_multipart_completed(start.elapsed());
        self.metrics.add_bytes_uploaded(total_size);
        Ok(())
    }

    async fn upload_one_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        slice: Bytes,
        cancel: &CancellationToken,
    ) -> Result<CompletedPart, (u32, TransferError)> {
        let size = slice.len() as u64;
        let result = self
            .part_retryer
            .run(cancel, || {
                let body = slice.clone();
                async move {
                    let attempt = self
                        .call_remote("upload_part", |client| {
                            let bucket = self.bucket.clone();
                            let key = key.to_string();
                            let upload_id = upload_id.to_string();
                            let body = body.clone();
                            async move {
                                client
                                    .upload_part(&bucket, &key, &upload_id, part_number as i32, body)
                                    .await
                            }
                        })
                        .await;
                    match attempt {
                        Ok((etag, accelerated)) => {
                            if accelerated {
                                self.metrics.add_accelerated_bytes(size);
                            }
                            Ok(etag)
                        }
                        Err(err) => {
                            self.multipart.update_part(
                                upload_id,
                                part_number,
                                size,
                                None,
                                Some(&err.to_string()),
                            );
                            Err(err)
                        }
                    }
                }
            })
            .await;

        match result {
            Ok(etag) => {
                self.multipart
                    .update_part(upload_id, part_number, size, Some(etag.clone()), None);
                self.metrics.record_part_uploaded(size);
                Ok(CompletedPart {
                    part_number: part_number as i32,
                    etag,
                })
            }
            Err(err) => {
                let err = match err {
                    RetryError::Cancelled => TransferError::Cancelled,
                    RetryError::Inner(e) => e,
                };
                Err((part_number, err))
            }
        }
    }

    /// Deletes an object. Idempotency on missing keys lives in the backend.
    pub async fn delete(&self, key: &str) -> Result<(), TransferError> {
        let (result, _) = self
            .call_remote("delete_object", |client| {
                let bucket = self.bucket.clone();
                let key = key.to_string();
                async move { client.delete_object(&bucket, &key).await }
            })
            .await?;
        Ok(result)
    }

    /// Fetches object metadata.
    pub async fn head(&self, key: &str) -> Result<ObjectMetadata, TransferError> {
        let (metadata, _) = self
            .call_remote("head_object", |client| {
                let bucket = self.bucket.clone();
                let key = key.to_string();
                async move { client.head_object(&bucket, &key).await }
            })
            .await?;
        Ok(metadata)
    }

    /// Lists objects under a prefix.
    pub async fn list(
        &self,
        prefix: &str,
        max_keys: Option<i32>,
    ) -> Result<Vec<ObjectMetadata>, TransferError> {
        let (listing, _) = self
            .call_remote("list_objects", |client| {
                let bucket = self.bucket.clone();
                let prefix = prefix.to_string();
                async move { client.list_objects(&bucket, &prefix, max_keys).await }
            })
            .await?;
        Ok(listing)
    }

    /// Probes bucket reachability.
    pub async fn head_bucket(&self) -> Result<(), TransferError> {
        let (result, _) = self
            .call_remote("head_bucket", |client| {
                let bucket = self.bucket.clone();
                async move { client.head_bucket(&bucket).await }
            })
            .await?;
        Ok(result)
    }
}

/// Chunk size policy: honor the configured chunk unless the remote-store
/// part limit forces larger chunks, clamped to the store's bounds.
pub fn chunk_size_policy(configured_chunk: u64, total_size: u64) -> u64 {
    let forced_by_part_limit = total_size.div_ceil(MAX_PARTS);
    configured_chunk
        .max(forced_by_part_limit)
        .clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

fn part_slice(data: &Bytes, chunk: u64, part_number: u32, total_size: u64) -> Bytes {
    let start = (part_number as u64 - 1) * chunk;
    let end = (start + chunk).min(total_size);
    data.slice(start as usize..end as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_slices_cover_the_object_exactly_once() {
        let data = Bytes::from((0..100u8).collect::<Vec<u8>>());
        let chunk = 30u64;
        let total = data.len() as u64;
        let parts = total.div_ceil(chunk) as u32;
        assert_eq!(parts, 4);

        let mut reassembled = Vec::new();
        for part in 1..=parts {
            reassembled.extend_from_slice(&part_slice(&data, chunk, part, total));
        }
        assert_eq!(reassembled, data.to_vec());
        // The last part is the remainder.
        assert_eq!(part_slice(&data, chunk, parts, total).len(), 10);
    }
}
