//! Typed client errors and the substring classifier fallback.

use thiserror::Error;
use tierstore_core::{ErrorCode, StorageError};

/// Errors returned by an [`ObjectStoreClient`](crate::ObjectStoreClient).
///
/// Typed variants come first; `Other` exists for messages the wire layer
/// cannot classify, and is run through [`classify_message`] when translated.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The requested key does not exist.
    #[error("no such key: {key}")]
    NoSuchKey { key: String },

    /// The bucket does not exist.
    #[error("no such bucket: {bucket}")]
    NoSuchBucket { bucket: String },

    /// A resource other than a key or bucket was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The object's storage class forbids the operation (e.g. an archived
    /// object that has not been restored).
    #[error("invalid object state: {message}")]
    InvalidObjectState {
        message: String,
        storage_class: Option<String>,
    },

    /// The store denied access.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The request exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// An unclassified error message from the wire layer.
    #[error("{0}")]
    Other(String),
}

impl ClientError {
    /// Whether the error is worth retrying: timeouts, transport failures,
    /// and unclassified errors carrying a server-fault marker.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Timeout(_) | ClientError::Network(_) => true,
            ClientError::Other(msg) => {
                msg.contains("InternalError")
                    || msg.contains("ServiceUnavailable")
                    || msg.contains("SlowDown")
                    || msg.contains("503")
                    || msg.contains("500")
            }
            _ => false,
        }
    }

    /// Whether the error means the object or bucket is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ClientError::NoSuchKey { .. }
                | ClientError::NoSuchBucket { .. }
                | ClientError::NotFound(_)
        )
    }
}

/// Substrings that identify a failed call against the accelerated endpoint.
///
/// Matching any of these disables acceleration for the process and reroutes
/// the call to the standard endpoint.
const ACCELERATION_ERROR_MARKERS: &[&str] = &[
    "InvalidRequest",
    "acceleration",
    "s3-accelerate",
    "transfer-acceleration",
    "AccelerateNotSupported",
    "BucketAlreadyExists",
];

/// Returns true if the error message identifies an acceleration failure.
pub fn is_acceleration_error(err: &ClientError) -> bool {
    let message = err.to_string();
    ACCELERATION_ERROR_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Maps an opaque error message onto an [`ErrorCode`].
///
/// Typed variants should be inspected first; this is the fallback for
/// strings the wire layer could not decode.
pub fn classify_message(message: &str) -> ErrorCode {
    if message.contains("NoSuchKey") || message.contains("NotFound") || message.contains("404") {
        ErrorCode::ObjectNotFound
    } else if message.contains("NoSuchBucket") {
        ErrorCode::BucketNotFound
    } else if message.contains("InvalidObjectState") {
        ErrorCode::InvalidState
    } else if message.contains("AccessDenied") || message.contains("403") {
        ErrorCode::AccessDenied
    } else if message.contains("timeout") || message.contains("Timeout") {
        ErrorCode::OperationTimeout
    } else if message.contains("connection") || message.contains("dns") {
        ErrorCode::NetworkError
    } else {
        ErrorCode::StorageRead
    }
}

impl ClientError {
    /// Translates this error into the unified [`StorageError`], attaching
    /// bucket/key/operation context.
    pub fn into_storage_error(
        self,
        operation: &'static str,
        bucket: &str,
        key: &str,
    ) -> StorageError {
        let code = match &self {
            ClientError::NoSuchKey { .. } | ClientError::NotFound(_) => ErrorCode::ObjectNotFound,
            ClientError::NoSuchBucket { .. } => ErrorCode::BucketNotFound,
            ClientError::InvalidObjectState { .. } => ErrorCode::InvalidState,
            ClientError::AccessDenied(_) => ErrorCode::AccessDenied,
            ClientError::Timeout(_) => ErrorCode::OperationTimeout,
            ClientError::Network(_) => ErrorCode::NetworkError,
            ClientError::Other(msg) => classify_message(msg),
        };

        let mut err = StorageError::new(code, self.to_string())
            .component("client")
            .operation(operation)
            .context("bucket", bucket)
            .caused_by(self.clone());
        if !key.is_empty() {
            err = err.context("key", key);
        }
        if let ClientError::InvalidObjectState {
            storage_class: Some(class),
            ..
        } = &self
        {
            err = err.context("storage_class", class.clone());
        }
        err
    }
}
