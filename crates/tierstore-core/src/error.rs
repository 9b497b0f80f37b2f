//! The unified error type surfaced to callers of the backend.
//!
//! Component-local errors (client, pool, breaker, retry, tiering) are typed
//! per crate; at the backend boundary they are translated into a single
//! [`StorageError`] carrying a stable [`ErrorCode`], the component and
//! operation that produced it, and a context map (bucket, key, endpoint, …)
//! for structured logging and troubleshooting.

use std::collections::BTreeMap;
use std::fmt;

/// Stable error codes exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ErrorCode {
    /// The requested object does not exist.
    ObjectNotFound,
    /// The configured bucket does not exist.
    BucketNotFound,
    /// The object or configuration is in a state that forbids the operation.
    InvalidState,
    /// The operation exceeded its deadline or was cancelled.
    OperationTimeout,
    /// A transport-level failure talking to the remote store.
    NetworkError,
    /// The remote store denied access.
    AccessDenied,
    /// A read from the remote store failed.
    StorageRead,
    /// A component gate (health, circuit breaker) rejected the call.
    ServiceUnavailable,
    /// Tier policy validation rejected the operation before any remote call.
    ValidationFailed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::ObjectNotFound => "ObjectNotFound",
            ErrorCode::BucketNotFound => "BucketNotFound",
            ErrorCode::InvalidState => "InvalidState",
            ErrorCode::OperationTimeout => "OperationTimeout",
            ErrorCode::NetworkError => "NetworkError",
            ErrorCode::AccessDenied => "AccessDenied",
            ErrorCode::StorageRead => "StorageRead",
            ErrorCode::ServiceUnavailable => "ServiceUnavailable",
            ErrorCode::ValidationFailed => "ValidationFailed",
        };
        f.write_str(s)
    }
}

/// Result alias used across the backend surface.
pub type StorageResult<T> = Result<T, StorageError>;

/// A tagged error carrying code, message, origin, and context.
#[derive(Debug)]
pub struct StorageError {
    code: ErrorCode,
    message: String,
    component: &'static str,
    operation: &'static str,
    context: BTreeMap<&'static str, String>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl StorageError {
    /// Creates a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            component: "backend",
            operation: "",
            context: BTreeMap::new(),
            source: None,
        }
    }

    /// Sets the component that produced this error.
    pub fn component(mut self, component: &'static str) -> Self {
        self.component = component;
        self
    }

    /// Sets the operation that produced this error.
    pub fn operation(mut self, operation: &'static str) -> Self {
        self.operation = operation;
        self
    }

    /// Attaches a context entry (bucket, key, endpoint, region, …).
    pub fn context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.insert(key, value.into());
        self
    }

    /// Attaches the underlying cause.
    pub fn caused_by(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The stable error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The component that produced this error.
    pub fn component_name(&self) -> &'static str {
        self.component
    }

    /// The operation during which the error occurred.
    pub fn operation_name(&self) -> &'static str {
        self.operation
    }

    /// The attached context entries.
    pub fn context_map(&self) -> &BTreeMap<&'static str, String> {
        &self.context
    }

    /// Returns true if the code is [`ErrorCode::ObjectNotFound`].
    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::ObjectNotFound
    }

    /// Returns true if the code is [`ErrorCode::ServiceUnavailable`].
    pub fn is_unavailable(&self) -> bool {
        self.code == ErrorCode::ServiceUnavailable
    }

    /// Returns true if the code is [`ErrorCode::ValidationFailed`].
    pub fn is_validation(&self) -> bool {
        self.code == ErrorCode::ValidationFailed
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if !self.operation.is_empty() {
            write!(f, " [{}/{}]", self.component, self.operation)?;
        }
        write!(f, ": {}", self.message)?;
        if !self.context.is_empty() {
            write!(f, " (")?;
            for (i, (k, v)) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{k}={v}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_operation_and_context() {
        let err = StorageError::new(ErrorCode::ObjectNotFound, "no such key")
            .component("transfer")
            .operation("get")
            .context("bucket", "data")
            .context("key", "a/b/c");

        let rendered = err.to_string();
        assert!(rendered.contains("ObjectNotFound"));
        assert!(rendered.contains("transfer/get"));
        assert!(rendered.contains("bucket=data"));
        assert!(rendered.contains("key=a/b/c"));
    }

    #[test]
    fn source_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow wire");
        let err = StorageError::new(ErrorCode::OperationTimeout, "request timed out").caused_by(io);

        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("slow wire"));
    }

    #[test]
    fn predicates_match_codes() {
        assert!(StorageError::new(ErrorCode::ObjectNotFound, "x").is_not_found());
        assert!(StorageError::new(ErrorCode::ServiceUnavailable, "x").is_unavailable());
        assert!(StorageError::new(ErrorCode::ValidationFailed, "x").is_validation());
    }
}
