//! Bounded retry with exponential backoff and jitter.
//!
//! The [`Retryer`] wraps an async callable and re-invokes it on retriable
//! errors, sleeping between attempts. It respects cancellation: the token is
//! checked before each attempt, the backoff sleep races against it, and a
//! fired token surfaces as [`RetryError::Cancelled`] without further
//! attempts.
//!
//! A circuit breaker composes *inside* the retry loop: transient breaker
//! rejections are retriable until the attempt budget is exhausted.
//!
//! # Example
//!
//! ```rust
//! use tierstore_retry::{Retryer, RetryError};
//! use tokio_util::sync::CancellationToken;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let retryer: Retryer<std::io::Error> = Retryer::builder()
//!     .name("reads")
//!     .max_attempts(4)
//!     .exponential_backoff(Duration::from_millis(100))
//!     .jitter(0.2)
//!     .on_retry(|attempt, err, delay| {
//!         eprintln!("attempt {attempt} failed ({err}), retrying in {delay:?}");
//!     })
//!     .build();
//!
//! let cancel = CancellationToken::new();
//! let value = retryer
//!     .run(&cancel, || async { Ok::<_, std::io::Error>(7) })
//!     .await
//!     .unwrap();
//! assert_eq!(value, 7);
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tierstore_core::{EventListeners, FnListener};
use tokio_util::sync::CancellationToken;

pub use backoff::ExponentialBackoff;
pub use events::RetryEvent;

mod backoff;
mod events;

/// Errors returned by [`Retryer::run`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The cancellation token fired before or between attempts.
    #[error("operation cancelled")]
    Cancelled,

    /// The final error: either non-retriable or the budget was exhausted.
    #[error(transparent)]
    Inner(E),
}

impl<E> RetryError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled)
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Inner(e) => Some(e),
            RetryError::Cancelled => None,
        }
    }
}

type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type OnRetry<E> = Arc<dyn Fn(usize, &E, Duration) + Send + Sync>;

/// Retries async callables according to the configured policy.
pub struct Retryer<E> {
    name: String,
    max_attempts: usize,
    backoff: ExponentialBackoff,
    predicate: Option<RetryPredicate<E>>,
    on_retry: Option<OnRetry<E>>,
    event_listeners: EventListeners<RetryEvent>,
}

impl<E> Retryer<E> {
    pub fn builder() -> RetryerBuilder<E> {
        RetryerBuilder::new()
    }

    fn should_retry(&self, err: &E) -> bool {
        self.predicate.as_ref().map(|p| p(err)).unwrap_or(true)
    }

    /// Runs `f` until it succeeds, the attempt budget is exhausted, the
    /// predicate declines, or `cancel` fires.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0usize;
        loop {
            if cancel.is_cancelled() {
                self.event_listeners.emit(&RetryEvent::Cancelled {
                    component: self.name.clone(),
                    timestamp: Instant::now(),
                });
                return Err(RetryError::Cancelled);
            }

            match f().await {
                Ok(value) => {
                    self.event_listeners.emit(&RetryEvent::Success {
                        component: self.name.clone(),
                        timestamp: Instant::now(),
                        attempts: attempt + 1,
                    });
                    return Ok(value);
                }
                Err(err) => {
                    if !self.should_retry(&err) {
                        self.event_listeners.emit(&RetryEvent::IgnoredError {
                            component: self.name.clone(),
                            timestamp: Instant::now(),
                        });
                        return Err(RetryError::Inner(err));
                    }

                    if attempt + 1 >= self.max_attempts {
                        tracing::warn!(
                            retry = %self.name,
                            attempts = attempt + 1,
                            "retry attempts exhausted"
                        );
                        self.event_listeners.emit(&RetryEvent::Exhausted {
                            component: self.name.clone(),
                            timestamp: Instant::now(),
                            attempts: attempt + 1,
                        });
                        return Err(RetryError::Inner(err));
                    }

                    let delay = self.backoff.delay(attempt);
                    if let Some(on_retry) = &self.on_retry {
                        on_retry(attempt + 1, &err, delay);
                    }
                    self.event_listeners.emit(&RetryEvent::Retry {
                        component: self.name.clone(),
                        timestamp: Instant::now(),
                        attempt: attempt + 1,
                        delay,
                    });
                    tracing::debug!(
                        retry = %self.name,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after delay"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            self.event_listeners.emit(&RetryEvent::Cancelled {
                                component: self.name.clone(),
                                timestamp: Instant::now(),
                            });
                            return Err(RetryError::Cancelled);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Builder for [`Retryer`].
pub struct RetryerBuilder<E> {
    name: String,
    max_attempts: usize,
    backoff: ExponentialBackoff,
    predicate: Option<RetryPredicate<E>>,
    on_retry: Option<OnRetry<E>>,
    event_listeners: EventListeners<RetryEvent>,
}

impl<E> Default for RetryerBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RetryerBuilder<E> {
    /// Creates a builder with defaults: 3 attempts, exponential backoff from
    /// 100ms with 20% jitter.
    pub fn new() -> Self {
        Self {
            name: "<unnamed>".to_string(),
            max_attempts: 3,
            backoff: ExponentialBackoff::new(Duration::from_millis(100)).jitter(0.2),
            predicate: None,
            on_retry: None,
            event_listeners: EventListeners::new(),
        }
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Total attempts including the initial one.
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn exponential_backoff(mut self, initial: Duration) -> Self {
        self.backoff = ExponentialBackoff::new(initial);
        self
    }

    pub fn fixed_backoff(mut self, interval: Duration) -> Self {
        self.backoff = ExponentialBackoff::fixed(interval);
        self
    }

    pub fn backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Randomization factor applied to every delay.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.backoff = self.backoff.jitter(jitter);
        self
    }

    /// Predicate deciding which errors are retried. Default: all.
    pub fn retry_on<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Callback invoked with `(attempt, error, delay)` before each retry.
    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, &E, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(f));
        self
    }

    /// Callback invoked with the attempt count when the budget is exhausted.
    pub fn on_exhausted<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::Exhausted { attempts, .. } = event {
                f(*attempts);
            }
        }));
        self
    }

    pub fn build(self) -> Retryer<E> {
        Retryer {
            name: self.name,
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            predicate: self.predicate,
            on_retry: self.on_retry,
            event_listeners: self.event_listeners,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    fn retryer(max_attempts: usize) -> Retryer<TestError> {
        Retryer::builder()
            .name("test")
            .max_attempts(max_attempts)
            .fixed_backoff(Duration::from_millis(10))
            .build()
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let calls = AtomicUsize::new(0);
        let result = retryer(3)
            .run(&CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>("ok")
            })
            .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicUsize::new(0);
        let result = retryer(5)
            .run(&CancellationToken::new(), || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError("transient"))
                } else {
                    Ok("recovered")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_budget() {
        let calls = AtomicUsize::new(0);
        let exhausted_with = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&exhausted_with);

        let retryer: Retryer<TestError> = Retryer::builder()
            .name("test")
            .max_attempts(3)
            .fixed_backoff(Duration::from_millis(10))
            .on_exhausted(move |attempts| {
                seen.store(attempts, Ordering::SeqCst);
            })
            .build();

        let result = retryer
            .run(&CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError("down"))
            })
            .await;
        assert!(matches!(result, Err(RetryError::Inner(TestError("down")))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(exhausted_with.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn predicate_blocks_retry() {
        let calls = AtomicUsize::new(0);
        let retryer: Retryer<TestError> = Retryer::builder()
            .max_attempts(5)
            .fixed_backoff(Duration::from_millis(1))
            .retry_on(|err: &TestError| err.0 != "fatal")
            .build();

        let result = retryer
            .run(&CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError("fatal"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_between_attempts() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let retryer: Retryer<TestError> = Retryer::builder()
            .max_attempts(10)
            .fixed_backoff(Duration::from_secs(5))
            .build();

        let counted = Arc::clone(&calls);
        let cancel_clone = cancel.clone();
        let task = tokio::spawn(async move {
            retryer
                .run(&cancel_clone, move || {
                    let counted = Arc::clone(&counted);
                    async move {
                        counted.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(TestError("transient"))
                    }
                })
                .await
        });

        // Let the first attempt fail and the backoff sleep begin.
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn on_retry_sees_error_and_delay() {
        let observed: Arc<std::sync::Mutex<Vec<(usize, String, Duration)>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&observed);

        let retryer: Retryer<TestError> = Retryer::builder()
            .max_attempts(3)
            .fixed_backoff(Duration::from_millis(25))
            .on_retry(move |attempt, err: &TestError, delay| {
                sink.lock().unwrap().push((attempt, err.to_string(), delay));
            })
            .build();

        let _ = retryer
            .run(&CancellationToken::new(), || async {
                Err::<(), _>(TestError("flaky"))
            })
            .await;

        let seen = observed.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (1, "flaky".to_string(), Duration::from_millis(25)));
        assert_eq!(seen[1].0, 2);
    }
}
