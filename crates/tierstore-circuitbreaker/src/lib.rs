//! Circuit breaker for remote object-store calls.
//!
//! A breaker guards one logical operation class (reads, writes, deletes,
//! lists). It counts failures inside a sliding interval and moves between
//! three states:
//!
//! - **Closed**: calls pass through; failures are counted.
//! - **Open**: calls are rejected immediately for the configured timeout.
//! - **HalfOpen**: after the timeout, a limited number of probe calls is
//!   admitted; one success closes the circuit, any failure reopens it.
//!
//! The breaker wraps the callable, not individual SDK requests; a retried
//! inner attempt counts as one guarded unit.
//!
//! # Example
//!
//! ```rust
//! use tierstore_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let breaker: CircuitBreaker<std::io::Error> = CircuitBreaker::new(
//!     CircuitBreakerConfig::builder()
//!         .name("writes")
//!         .failure_threshold(3)
//!         .open_timeout(Duration::from_secs(10))
//!         .on_state_change(|name, from, to| {
//!             println!("breaker {name}: {from:?} -> {to:?}");
//!         })
//!         .build(),
//! );
//!
//! let result = breaker.call(|| async { Ok::<_, std::io::Error>(42) }).await;
//! assert_eq!(result.unwrap(), 42);
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::AtomicU8;
use std::sync::{Arc, Mutex};

use crate::circuit::Circuit;

pub use circuit::CircuitState;
pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use error::CircuitBreakerError;
pub use events::CircuitBreakerEvent;

mod circuit;
mod config;
mod error;
mod events;

type FailureClassifier<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// A circuit breaker guarding async callables returning `Result<T, E>`.
pub struct CircuitBreaker<E> {
    circuit: Mutex<Circuit>,
    state_atomic: Arc<AtomicU8>,
    config: CircuitBreakerConfig,
    classifier: FailureClassifier<E>,
}

impl<E> CircuitBreaker<E> {
    /// Creates a breaker counting every `Err` as a failure.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let state_atomic = Arc::new(AtomicU8::new(CircuitState::Closed as u8));
        Self {
            circuit: Mutex::new(Circuit::new_with_atomic(Arc::clone(&state_atomic))),
            state_atomic,
            config,
            classifier: Arc::new(|_| true),
        }
    }

    /// Replaces the failure classifier. Errors for which the classifier
    /// returns `false` (e.g. not-found) do not count toward tripping the
    /// circuit, though they still propagate to the caller.
    pub fn with_failure_classifier<F>(mut self, f: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(f);
        self
    }

    /// Runs `f` through the breaker.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permitted = {
            let mut circuit = self.circuit.lock().unwrap();
            circuit.try_acquire(&self.config)
        };
        if !permitted {
            return Err(CircuitBreakerError::OpenCircuit {
                name: self.config.name.clone(),
            });
        }

        let result = f().await;

        let mut circuit = self.circuit.lock().unwrap();
        match &result {
            Err(err) if (self.classifier)(err) => circuit.record_failure(&self.config),
            _ => circuit.record_success(&self.config),
        }

        result.map_err(CircuitBreakerError::Inner)
    }

    /// Current state without locking the circuit.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state_atomic.load(std::sync::atomic::Ordering::Acquire))
    }

    /// Failure count inside the current sliding interval.
    pub fn failure_count(&self) -> usize {
        self.circuit.lock().unwrap().failure_count(&self.config)
    }

    /// Forces the circuit open.
    pub fn force_open(&self) {
        self.circuit.lock().unwrap().force_open(&self.config);
    }

    /// Forces the circuit closed.
    pub fn force_closed(&self) {
        self.circuit.lock().unwrap().force_closed(&self.config);
    }

    /// Resets the circuit to closed and clears counters.
    pub fn reset(&self) {
        self.circuit.lock().unwrap().reset(&self.config);
    }

    /// The breaker's configured name.
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// A registry handing out one breaker per operation class.
pub struct CircuitBreakerRegistry<E> {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker<E>>>>,
    make: Box<dyn Fn(&str) -> CircuitBreaker<E> + Send + Sync>,
}

impl<E> CircuitBreakerRegistry<E> {
    /// Creates a registry; `make` builds the breaker for a given class name.
    pub fn new<F>(make: F) -> Self
    where
        F: Fn(&str) -> CircuitBreaker<E> + Send + Sync + 'static,
    {
        Self {
            breakers: Mutex::new(HashMap::new()),
            make: Box::new(make),
        }
    }

    /// Returns the breaker for `name`, creating it on first use.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker<E>> {
        let mut breakers = self.breakers.lock().unwrap();
        if let Some(breaker) = breakers.get(name) {
            return Arc::clone(breaker);
        }
        let breaker = Arc::new((self.make)(name));
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Names of all instantiated breakers.
    pub fn names(&self) -> Vec<String> {
        self.breakers.lock().unwrap().keys().cloned().collect()
    }
}
