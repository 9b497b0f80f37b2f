//! Accelerated-endpoint selection with a one-way fallback latch.
//!
//! When an accelerated client is configured and active, every remote call is
//! attempted against it first. An acceleration-specific failure (matched by
//! [`is_acceleration_error`](crate::error::is_acceleration_error)) disables
//! acceleration for the rest of the process, logs the fallback, and retries
//! the call on the standard client. Re-enabling is an explicit
//! administrative action.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{is_acceleration_error, ClientError};
use crate::ObjectStoreClient;

/// Per-call selector between the accelerated and standard clients.
pub struct EndpointManager {
    accelerated: Option<Arc<dyn ObjectStoreClient>>,
    active: AtomicBool,
    fallback_events: AtomicU64,
}

impl EndpointManager {
    /// Creates a manager. Acceleration starts active iff an accelerated
    /// client is provided.
    pub fn new(accelerated: Option<Arc<dyn ObjectStoreClient>>) -> Self {
        let active = accelerated.is_some();
        Self {
            accelerated,
            active: AtomicBool::new(active),
            fallback_events: AtomicU64::new(0),
        }
    }

    /// Whether the accelerated endpoint is currently in use.
    pub fn acceleration_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && self.accelerated.is_some()
    }

    /// Number of fallback events observed so far.
    pub fn fallback_count(&self) -> u64 {
        self.fallback_events.load(Ordering::Relaxed)
    }

    /// Administrative re-arm after a fallback disabled acceleration.
    pub fn re_enable_acceleration(&self) {
        if self.accelerated.is_some() {
            tracing::info!("re-enabling accelerated endpoint");
            self.active.store(true, Ordering::Release);
        }
    }

    /// Runs `call` against the accelerated client when active, falling back
    /// to `standard` on an acceleration-specific error. Non-acceleration
    /// errors propagate unchanged.
    ///
    /// Returns the call result plus a flag telling whether the accelerated
    /// endpoint served it.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &'static str,
        standard: Arc<dyn ObjectStoreClient>,
        call: F,
    ) -> (Result<T, ClientError>, bool)
    where
        F: Fn(Arc<dyn ObjectStoreClient>) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        if self.acceleration_active() {
            let accelerated = Arc::clone(self.accelerated.as_ref().expect("active implies client"));
            match call(accelerated).await {
                Ok(value) => return (Ok(value), true),
                Err(err) if is_acceleration_error(&err) => {
                    tracing::warn!(
                        operation,
                        error = %err,
                        "accelerated endpoint failed, falling back to standard endpoint"
                    );
                    self.active.store(false, Ordering::Release);
                    self.fallback_events.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => return (Err(err), true),
            }
        }

        (call(standard).await, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryClient;

    fn clients() -> (Arc<InMemoryClient>, Arc<InMemoryClient>) {
        (
            Arc::new(InMemoryClient::with_bucket("data")),
            Arc::new(InMemoryClient::with_bucket("data")),
        )
    }

    #[tokio::test]
    async fn acceleration_error_latches_fallback() {
        let (standard, accelerated) = clients();
        accelerated.fail_next(
            "head_bucket",
            ClientError::Other("InvalidRequest: Transfer acceleration is not enabled".into()),
        );

        let manager = EndpointManager::new(Some(accelerated.clone() as Arc<dyn ObjectStoreClient>));
        assert!(manager.acceleration_active());

        let (result, used_accel) = manager
            .execute("head_bucket", standard.clone(), |c| async move {
                c.head_bucket("data").await
            })
            .await;
        assert!(result.is_ok());
        assert!(!used_accel);
        assert!(!manager.acceleration_active());
        assert_eq!(manager.fallback_count(), 1);

        // Subsequent calls skip the accelerated client entirely.
        let (result, used_accel) = manager
            .execute("head_bucket", standard.clone(), |c| async move {
                c.head_bucket("data").await
            })
            .await;
        assert!(result.is_ok());
        assert!(!used_accel);
        assert_eq!(accelerated.call_count("head_bucket"), 1);
        assert_eq!(standard.call_count("head_bucket"), 2);
    }

    #[tokio::test]
    async fn non_acceleration_error_propagates() {
        let (standard, accelerated) = clients();
        accelerated.fail_next("head_bucket", ClientError::Timeout("slow".into()));

        let manager = EndpointManager::new(Some(accelerated as Arc<dyn ObjectStoreClient>));
        let (result, used_accel) = manager
            .execute("head_bucket", standard.clone(), |c| async move {
                c.head_bucket("data").await
            })
            .await;
        assert!(matches!(result, Err(ClientError::Timeout(_))));
        assert!(used_accel);
        assert!(manager.acceleration_active());
        assert_eq!(standard.call_count("head_bucket"), 0);
    }

    #[tokio::test]
    async fn re_enable_is_explicit() {
        let (standard, accelerated) = clients();
        accelerated.fail_next(
            "head_bucket",
            ClientError::Other("AccelerateNotSupported".into()),
        );

        let manager = EndpointManager::new(Some(accelerated.clone() as Arc<dyn ObjectStoreClient>));
        let _ = manager
            .execute("head_bucket", standard.clone(), |c| async move {
                c.head_bucket("data").await
            })
            .await;
        assert!(!manager.acceleration_active());

        manager.re_enable_acceleration();
        assert!(manager.acceleration_active());

        let (_, used_accel) = manager
            .execute("head_bucket", standard, |c| async move {
                c.head_bucket("data").await
            })
            .await;
        assert!(used_accel);
    }

    #[tokio::test]
    async fn without_accelerated_client_standard_is_used() {
        let (standard, _) = clients();
        let manager = EndpointManager::new(None);
        assert!(!manager.acceleration_active());

        let (result, used_accel) = manager
            .execute("head_bucket", standard, |c| async move {
                c.head_bucket("data").await
            })
            .await;
        assert!(result.is_ok());
        assert!(!used_accel);
    }
}
