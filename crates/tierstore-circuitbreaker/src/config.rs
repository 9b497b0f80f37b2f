use std::time::Duration;

use tierstore_core::{EventListeners, FnListener};

use crate::circuit::CircuitState;
use crate::events::CircuitBreakerEvent;

/// Configuration for one circuit breaker instance.
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    pub(crate) name: String,
    /// Failures inside the sliding interval that trip the circuit.
    pub(crate) failure_threshold: usize,
    /// Width of the sliding failure interval.
    pub(crate) sliding_interval: Duration,
    /// How long the circuit stays open before probing.
    pub(crate) open_timeout: Duration,
    /// Probe calls admitted while half-open.
    pub(crate) half_open_max_requests: usize,
    pub(crate) event_listeners: EventListeners<CircuitBreakerEvent>,
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

/// Builder for [`CircuitBreakerConfig`].
pub struct CircuitBreakerConfigBuilder {
    name: String,
    failure_threshold: usize,
    sliding_interval: Duration,
    open_timeout: Duration,
    half_open_max_requests: usize,
    event_listeners: EventListeners<CircuitBreakerEvent>,
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerConfigBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - failure_threshold: 5
    /// - sliding_interval: 60s
    /// - open_timeout: 30s
    /// - half_open_max_requests: 1
    pub fn new() -> Self {
        Self {
            name: "<unnamed>".to_string(),
            failure_threshold: 5,
            sliding_interval: Duration::from_secs(60),
            open_timeout: Duration::from_secs(30),
            half_open_max_requests: 1,
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the name for this breaker (used in events and logs).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Failures within the sliding interval required to open the circuit.
    pub fn failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Width of the sliding interval failures are counted in.
    pub fn sliding_interval(mut self, interval: Duration) -> Self {
        self.sliding_interval = interval;
        self
    }

    /// How long the circuit stays open before admitting probes.
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Probe calls admitted while half-open.
    pub fn half_open_max_requests(mut self, max: usize) -> Self {
        self.half_open_max_requests = max.max(1);
        self
    }

    /// Registers a callback invoked on every state transition with
    /// `(name, from, to)`.
    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let CircuitBreakerEvent::StateTransition {
                component,
                from_state,
                to_state,
                ..
            } = event
            {
                f(component, *from_state, *to_state);
            }
        }));
        self
    }

    /// Registers a callback invoked when a call is rejected while open.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let CircuitBreakerEvent::CallRejected { component, .. } = event {
                f(component);
            }
        }));
        self
    }

    pub fn build(self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            name: self.name,
            failure_threshold: self.failure_threshold,
            sliding_interval: self.sliding_interval,
            open_timeout: self.open_timeout,
            half_open_max_requests: self.half_open_max_requests,
            event_listeners: self.event_listeners,
        }
    }
}
