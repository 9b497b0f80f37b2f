use std::time::{Duration, Instant};

use tierstore_core::StorageEvent;

/// Events emitted by the retry loop.
#[derive(Debug, Clone)]
pub enum RetryEvent {
    /// A retry attempt is about to be made after the delay.
    Retry {
        component: String,
        timestamp: Instant,
        attempt: usize,
        delay: Duration,
    },
    /// The operation succeeded (first try or after retries).
    Success {
        component: String,
        timestamp: Instant,
        attempts: usize,
    },
    /// The operation failed after exhausting all attempts.
    Exhausted {
        component: String,
        timestamp: Instant,
        attempts: usize,
    },
    /// An error occurred but the predicate declined to retry it.
    IgnoredError {
        component: String,
        timestamp: Instant,
    },
    /// The cancellation token fired; no further attempts were made.
    Cancelled {
        component: String,
        timestamp: Instant,
    },
}

impl StorageEvent for RetryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RetryEvent::Retry { .. } => "Retry",
            RetryEvent::Success { .. } => "Success",
            RetryEvent::Exhausted { .. } => "Exhausted",
            RetryEvent::IgnoredError { .. } => "IgnoredError",
            RetryEvent::Cancelled { .. } => "Cancelled",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RetryEvent::Retry { timestamp, .. }
            | RetryEvent::Success { timestamp, .. }
            | RetryEvent::Exhausted { timestamp, .. }
            | RetryEvent::IgnoredError { timestamp, .. }
            | RetryEvent::Cancelled { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            RetryEvent::Retry { component, .. }
            | RetryEvent::Success { component, .. }
            | RetryEvent::Exhausted { component, .. }
            | RetryEvent::IgnoredError { component, .. }
            | RetryEvent::Cancelled { component, .. } => component,
        }
    }
}
