//! The remote-store client contract and its supporting pieces.
//!
//! The backend never talks to a vendor SDK directly; it goes through the
//! [`ObjectStoreClient`] trait, which mirrors the minimal request set the
//! underlying store must provide (`HeadBucket`, `GetObject`, `PutObject`,
//! the multipart family, …). Two implementations ship here:
//!
//! * [`InMemoryClient`] — an in-process store used by the test suite, with
//!   scripted failure injection.
//! * [`EndpointManager`] — not a client itself, but the per-call selector
//!   between an accelerated endpoint and the standard one, including the
//!   one-way fallback latch that disables acceleration for the process when
//!   an acceleration-specific error is observed.
//!
//! Errors are typed ([`ClientError`]); substring classification is reserved
//! for genuinely opaque messages coming out of the wire layer.

use async_trait::async_trait;
use bytes::Bytes;
use tierstore_core::{ByteRange, ObjectMetadata};

pub mod endpoint;
pub mod error;
pub mod memory;

pub use endpoint::EndpointManager;
pub use error::{is_acceleration_error, ClientError};
pub use memory::InMemoryClient;

/// One entry of the ordered part list passed to `CompleteMultipartUpload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// The capability set the remote store must provide.
///
/// Implementations wrap a vendor SDK client bound to one endpoint; the
/// resilience envelope and all policy live above this trait.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Probes bucket existence and reachability.
    async fn head_bucket(&self, bucket: &str) -> Result<(), ClientError>;

    /// Fetches an object, optionally restricted to a byte range.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<Bytes, ClientError>;

    /// Stores an object under the given storage class.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        storage_class: &str,
    ) -> Result<(), ClientError>;

    /// Deletes an object. Deleting a missing key is an error at this layer;
    /// idempotent-delete semantics are applied above.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ClientError>;

    /// Fetches object metadata without the body.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, ClientError>;

    /// Lists objects under a prefix. `max_keys` of `None` uses the server
    /// default.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: Option<i32>,
    ) -> Result<Vec<ObjectMetadata>, ClientError>;

    /// Starts a multipart upload and returns the upload id.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        storage_class: &str,
    ) -> Result<String, ClientError>;

    /// Uploads one part and returns its etag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, ClientError>;

    /// Completes a multipart upload. `parts` must be sorted by ascending
    /// part number.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), ClientError>;

    /// Aborts a multipart upload, discarding stored parts.
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ClientError>;
}
