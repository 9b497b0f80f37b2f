//! A bounded pool of reusable client handles.
//!
//! Handles are created on demand by a [`HandleFactory`], kept on an idle
//! queue between uses, and periodically probed by a background liveness
//! check. Acquisition blocks up to a configurable timeout; on timeout the
//! pool can hand out a freshly-built *overflow* handle that bypasses the
//! size cap and is destroyed on release instead of re-enrolled, so handle
//! accounting never leaks.
//!
//! # Example
//!
//! ```rust
//! use tierstore_pool::{ClientPool, HandleFactory, PoolConfig, PoolError};
//! use std::sync::atomic::{AtomicU32, Ordering};
//!
//! struct Numbers(AtomicU32);
//!
//! #[async_trait::async_trait]
//! impl HandleFactory for Numbers {
//!     type Handle = u32;
//!     async fn create(&self) -> Result<u32, PoolError> {
//!         Ok(self.0.fetch_add(1, Ordering::Relaxed))
//!     }
//!     async fn probe(&self, _handle: &u32) -> bool {
//!         true
//!     }
//! }
//!
//! # async fn example() {
//! let pool = ClientPool::new(Numbers(AtomicU32::new(0)), PoolConfig::default());
//! let handle = pool.acquire().await.unwrap();
//! assert_eq!(*handle, 0);
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Errors returned by pool operations.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// The pool has been shut down.
    #[error("pool is closed")]
    Closed,
    /// No handle became available within the acquire timeout.
    #[error("timed out waiting for a pooled handle")]
    Timeout,
    /// The factory failed to build a handle.
    #[error("handle creation failed: {0}")]
    CreateFailed(String),
}

/// Builds and probes pool handles.
#[async_trait]
pub trait HandleFactory: Send + Sync + 'static {
    type Handle: Send + 'static;

    /// Creates a fresh handle.
    async fn create(&self) -> Result<Self::Handle, PoolError>;

    /// Cheap liveness probe; false marks the handle for destruction.
    async fn probe(&self, handle: &Self::Handle) -> bool;
}

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of enrolled handles.
    pub max_size: usize,
    /// How long `acquire` waits before the timeout path.
    pub acquire_timeout: Duration,
    /// Whether a timeout builds an overflow handle instead of failing.
    pub create_on_timeout: bool,
    /// Interval of the background liveness check.
    pub liveness_interval: Duration,
    /// Pool name used in logs.
    pub name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            acquire_timeout: Duration::from_secs(5),
            create_on_timeout: true,
            liveness_interval: Duration::from_secs(30),
            name: "client-pool".to_string(),
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub created: u64,
    pub destroyed: u64,
    pub hits: u64,
    pub misses: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub overflow_created: u64,
    pub active: usize,
    pub idle: usize,
    pub max_size: usize,
}

struct PoolState<H> {
    idle: VecDeque<H>,
    /// Enrolled handles (idle + checked out), excluding overflow handles.
    size: usize,
    max_size: usize,
    closed: bool,
    created: u64,
    destroyed: u64,
    hits: u64,
    misses: u64,
    timeouts: u64,
    errors: u64,
    overflow_created: u64,
}

struct Shared<F: HandleFactory> {
    factory: F,
    state: Mutex<PoolState<F::Handle>>,
    available: Notify,
    config: PoolConfig,
}

/// The pool itself. Cheap to clone via `Arc`.
pub struct ClientPool<F: HandleFactory> {
    shared: Arc<Shared<F>>,
    liveness: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// A checked-out handle. Returning it to the pool happens on drop; overflow
/// handles are destroyed instead.
pub struct PoolGuard<F: HandleFactory> {
    handle: Option<F::Handle>,
    overflow: bool,
    shared: Arc<Shared<F>>,
}

impl<F: HandleFactory> std::fmt::Debug for PoolGuard<F>
where
    F::Handle: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard")
            .field("handle", &self.handle)
            .field("overflow", &self.overflow)
            .finish()
    }
}

impl<F: HandleFactory> std::ops::Deref for PoolGuard<F> {
    type Target = F::Handle;

    fn deref(&self) -> &Self::Target {
        self.handle.as_ref().expect("handle present until drop")
    }
}

impl<F: HandleFactory> Drop for PoolGuard<F> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let mut state = self.shared.state.lock().unwrap();
        if self.overflow {
            state.destroyed += 1;
            return;
        }
        if state.closed || state.idle.len() >= state.max_size {
            state.destroyed += 1;
            state.size = state.size.saturating_sub(1);
            return;
        }
        state.idle.push_back(handle);
        drop(state);
        self.shared.available.notify_one();
    }
}

impl<F: HandleFactory> ClientPool<F> {
    pub fn new(factory: F, config: PoolConfig) -> Arc<Self> {
        let shared = Arc::new(Shared {
            factory,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                size: 0,
                max_size: config.max_size,
                closed: false,
                created: 0,
                destroyed: 0,
                hits: 0,
                misses: 0,
                timeouts: 0,
                errors: 0,
                overflow_created: 0,
            }),
            available: Notify::new(),
            config,
        });
        Arc::new(Self {
            shared,
            liveness: Mutex::new(None),
        })
    }

    /// Acquires a handle, waiting up to the configured timeout.
    pub async fn acquire(&self) -> Result<PoolGuard<F>, PoolError> {
        let deadline = Instant::now() + self.shared.config.acquire_timeout;
        let mut counted_miss = false;

        loop {
            // Fast path under the lock; every await happens outside it.
            let must_create = {
                let mut state = self.shared.state.lock().unwrap();
                if state.closed {
                    return Err(PoolError::Closed);
                }
                if let Some(handle) = state.idle.pop_front() {
                    state.hits += 1;
                    return Ok(self.guard(handle, false));
                }
                if !counted_miss {
                    state.misses += 1;
                    counted_miss = true;
                }
                if state.size < state.max_size {
                    state.size += 1;
                    true
                } else {
                    false
                }
            };
            if must_create {
                let handle = self.create_enrolled().await?;
                return Ok(self.guard(handle, false));
            }

            let notified = self.shared.available.notified();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero()
                || tokio::time::timeout(remaining, notified).await.is_err()
            {
                return self.acquire_timed_out().await;
            }
        }
    }

    async fn create_enrolled(&self) -> Result<F::Handle, PoolError> {
        match self.shared.factory.create().await {
            Ok(handle) => {
                self.shared.state.lock().unwrap().created += 1;
                Ok(handle)
            }
            Err(err) => {
                let mut state = self.shared.state.lock().unwrap();
                state.size = state.size.saturating_sub(1);
                state.errors += 1;
                Err(err)
            }
        }
    }

    async fn acquire_timed_out(&self) -> Result<PoolGuard<F>, PoolError> {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.timeouts += 1;
            if !self.shared.config.create_on_timeout {
                return Err(PoolError::Timeout);
            }
        }
        tracing::debug!(
            pool = %self.shared.config.name,
            "acquire timed out, building overflow handle"
        );
        // The overflow handle serves this caller only and is destroyed on
        // release, keeping the enrolled size honest.
        match self.shared.factory.create().await {
            Ok(handle) => {
                let mut state = self.shared.state.lock().unwrap();
                state.created += 1;
                state.overflow_created += 1;
                drop(state);
                Ok(self.guard(handle, true))
            }
            Err(err) => {
                self.shared.state.lock().unwrap().errors += 1;
                Err(err)
            }
        }
    }

    fn guard(&self, handle: F::Handle, overflow: bool) -> PoolGuard<F> {
        PoolGuard {
            handle: Some(handle),
            overflow,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Prefills the pool with up to `count` idle handles.
    pub async fn warmup(&self, count: usize) -> Result<usize, PoolError> {
        let mut built = 0;
        for _ in 0..count {
            {
                let mut state = self.shared.state.lock().unwrap();
                if state.closed {
                    return Err(PoolError::Closed);
                }
                if state.size >= state.max_size {
                    break;
                }
                state.size += 1;
            }
            let handle = self.create_enrolled().await?;
            {
                let mut state = self.shared.state.lock().unwrap();
                state.idle.push_back(handle);
            }
            self.shared.available.notify_one();
            built += 1;
        }
        if built > 0 {
            tracing::info!(pool = %self.shared.config.name, handles = built, "pool warmup complete");
        }
        Ok(built)
    }

    /// Changes the size cap, draining excess idle handles when shrinking.
    pub fn resize(&self, new_max: usize) {
        let mut state = self.shared.state.lock().unwrap();
        state.max_size = new_max;
        while state.size > new_max {
            match state.idle.pop_back() {
                Some(_handle) => {
                    state.destroyed += 1;
                    state.size -= 1;
                }
                None => break,
            }
        }
    }

    /// Shuts the pool down: pending and future acquires fail, idle handles
    /// are dropped, the liveness task stops.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.closed = true;
            while let Some(_handle) = state.idle.pop_front() {
                state.destroyed += 1;
                state.size -= 1;
            }
        }
        self.shared.available.notify_waiters();
        if let Some(task) = self.liveness.lock().unwrap().take() {
            task.abort();
        }
    }

    /// Starts the background liveness loop. Samples up to three idle handles
    /// per tick, probes each with a cheap server call, and destroys the ones
    /// that fail.
    pub fn start_liveness(self: &Arc<Self>) {
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(shared.config.liveness_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let sample: Vec<F::Handle> = {
                    let mut state = shared.state.lock().unwrap();
                    if state.closed {
                        return;
                    }
                    let take = state.idle.len().min(3);
                    state.idle.drain(..take).collect()
                };
                if sample.is_empty() {
                    continue;
                }
                let sampled = sample.len();
                let mut unhealthy = 0usize;
                let mut healthy = Vec::with_capacity(sampled);
                for handle in sample {
                    if shared.factory.probe(&handle).await {
                        healthy.push(handle);
                    } else {
                        unhealthy += 1;
                    }
                }
                {
                    let mut state = shared.state.lock().unwrap();
                    state.destroyed += unhealthy as u64;
                    state.size = state.size.saturating_sub(unhealthy);
                    for handle in healthy {
                        state.idle.push_back(handle);
                        shared.available.notify_one();
                    }
                }
                if unhealthy * 2 > sampled {
                    tracing::warn!(
                        pool = %shared.config.name,
                        sampled,
                        unhealthy,
                        "more than half of sampled handles failed the liveness probe"
                    );
                }
            }
        });
        *self.liveness.lock().unwrap() = Some(task);
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock().unwrap();
        PoolStats {
            created: state.created,
            destroyed: state.destroyed,
            hits: state.hits,
            misses: state.misses,
            timeouts: state.timeouts,
            errors: state.errors,
            overflow_created: state.overflow_created,
            active: state.size - state.idle.len(),
            idle: state.idle.len(),
            max_size: state.max_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct Numbers {
        seq: AtomicU32,
        healthy: AtomicBool,
    }

    impl Numbers {
        fn new() -> Self {
            Self {
                seq: AtomicU32::new(0),
                healthy: AtomicBool::new(true),
            }
        }
    }

    #[async_trait]
    impl HandleFactory for Numbers {
        type Handle = u32;

        async fn create(&self) -> Result<u32, PoolError> {
            Ok(self.seq.fetch_add(1, Ordering::Relaxed))
        }

        async fn probe(&self, _handle: &u32) -> bool {
            self.healthy.load(Ordering::Relaxed)
        }
    }

    fn config(max: usize) -> PoolConfig {
        PoolConfig {
            max_size: max,
            acquire_timeout: Duration::from_millis(50),
            create_on_timeout: false,
            liveness_interval: Duration::from_secs(30),
            name: "test".into(),
        }
    }

    #[tokio::test]
    async fn handles_are_reused() {
        let pool = ClientPool::new(Numbers::new(), config(2));

        let first = pool.acquire().await.unwrap();
        assert_eq!(*first, 0);
        drop(first);

        let second = pool.acquire().await.unwrap();
        assert_eq!(*second, 0);

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn exhausted_pool_times_out() {
        let pool = ClientPool::new(Numbers::new(), config(1));
        let _held = pool.acquire().await.unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Timeout));
        assert_eq!(pool.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn overflow_handle_is_destroyed_on_release() {
        let mut cfg = config(1);
        cfg.create_on_timeout = true;
        let pool = ClientPool::new(Numbers::new(), cfg);

        let held = pool.acquire().await.unwrap();
        let overflow = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().overflow_created, 1);

        drop(overflow);
        let stats = pool.stats();
        assert_eq!(stats.destroyed, 1);
        // The enrolled handle is still the only one counted.
        assert_eq!(stats.active, 1);
        drop(held);
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn warmup_prefills_up_to_cap() {
        let pool = ClientPool::new(Numbers::new(), config(3));
        let built = pool.warmup(10).await.unwrap();
        assert_eq!(built, 3);
        let stats = pool.stats();
        assert_eq!(stats.idle, 3);
        assert_eq!(stats.created, 3);
    }

    #[tokio::test]
    async fn resize_drains_excess_idle() {
        let pool = ClientPool::new(Numbers::new(), config(4));
        pool.warmup(4).await.unwrap();

        pool.resize(1);
        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.destroyed, 3);
        assert_eq!(stats.max_size, 1);
    }

    #[tokio::test]
    async fn close_rejects_acquires_and_drains() {
        let pool = ClientPool::new(Numbers::new(), config(2));
        pool.warmup(2).await.unwrap();

        pool.close();
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.destroyed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_destroys_unhealthy_handles() {
        let factory = Numbers::new();
        factory.healthy.store(false, Ordering::Relaxed);
        let mut cfg = config(3);
        cfg.liveness_interval = Duration::from_secs(30);
        let pool = ClientPool::new(factory, cfg);
        pool.warmup(3).await.unwrap();
        pool.start_liveness();

        // First tick fires immediately; all sampled handles fail the probe.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.destroyed, 3);
        pool.close();
    }

    #[tokio::test]
    async fn waiting_acquire_wakes_on_release() {
        let pool = ClientPool::new(Numbers::new(), {
            let mut cfg = config(1);
            cfg.acquire_timeout = Duration::from_secs(5);
            cfg
        });

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|g| *g) })
        };
        tokio::task::yield_now().await;
        drop(held);

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got, 0);
    }
}
