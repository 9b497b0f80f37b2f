use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::events::CircuitBreakerEvent;

/// Represents the state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// The circuit is closed and calls are allowed.
    Closed = 0,
    /// The circuit is open and calls are rejected.
    Open = 1,
    /// The circuit is half-open and a limited number of probes are allowed.
    HalfOpen = 2,
}

impl CircuitState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

pub(crate) struct Circuit {
    state: CircuitState,
    state_atomic: Arc<AtomicU8>,
    last_state_change: Instant,
    /// Failure timestamps inside the sliding interval.
    failures: VecDeque<Instant>,
    /// Probes admitted since entering half-open.
    half_open_admitted: usize,
}

impl Circuit {
    pub(crate) fn new_with_atomic(state_atomic: Arc<AtomicU8>) -> Self {
        Self {
            state: CircuitState::Closed,
            state_atomic,
            last_state_change: Instant::now(),
            failures: VecDeque::new(),
            half_open_admitted: 0,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Failure count inside the current sliding interval.
    pub fn failure_count(&mut self, config: &CircuitBreakerConfig) -> usize {
        self.prune(config);
        self.failures.len()
    }

    fn prune(&mut self, config: &CircuitBreakerConfig) {
        let now = Instant::now();
        while let Some(first) = self.failures.front() {
            if now.duration_since(*first) > config.sliding_interval {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn try_acquire(&mut self, config: &CircuitBreakerConfig) -> bool {
        match self.state {
            CircuitState::Closed => {
                self.emit_permitted(config);
                true
            }
            CircuitState::Open => {
                if self.last_state_change.elapsed() >= config.open_timeout {
                    self.transition_to(CircuitState::HalfOpen, config);
                    self.half_open_admitted = 1;
                    self.emit_permitted(config);
                    true
                } else {
                    config
                        .event_listeners
                        .emit(&CircuitBreakerEvent::CallRejected {
                            component: config.name.clone(),
                            timestamp: Instant::now(),
                        });
                    false
                }
            }
            CircuitState::HalfOpen => {
                let permitted = self.half_open_admitted < config.half_open_max_requests;
                if permitted {
                    self.half_open_admitted += 1;
                    self.emit_permitted(config);
                } else {
                    config
                        .event_listeners
                        .emit(&CircuitBreakerEvent::CallRejected {
                            component: config.name.clone(),
                            timestamp: Instant::now(),
                        });
                }
                permitted
            }
        }
    }

    pub fn record_success(&mut self, config: &CircuitBreakerConfig) {
        config
            .event_listeners
            .emit(&CircuitBreakerEvent::SuccessRecorded {
                component: config.name.clone(),
                timestamp: Instant::now(),
                state: self.state,
            });

        if self.state == CircuitState::HalfOpen {
            self.transition_to(CircuitState::Closed, config);
        }
    }

    pub fn record_failure(&mut self, config: &CircuitBreakerConfig) {
        config
            .event_listeners
            .emit(&CircuitBreakerEvent::FailureRecorded {
                component: config.name.clone(),
                timestamp: Instant::now(),
                state: self.state,
            });

        match self.state {
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Open, config);
            }
            CircuitState::Closed => {
                self.failures.push_back(Instant::now());
                self.prune(config);
                if self.failures.len() >= config.failure_threshold {
                    self.transition_to(CircuitState::Open, config);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn force_open(&mut self, config: &CircuitBreakerConfig) {
        self.transition_to(CircuitState::Open, config);
    }

    pub fn force_closed(&mut self, config: &CircuitBreakerConfig) {
        self.transition_to(CircuitState::Closed, config);
    }

    pub fn reset(&mut self, config: &CircuitBreakerConfig) {
        self.transition_to(CircuitState::Closed, config);
    }

    fn emit_permitted(&self, config: &CircuitBreakerConfig) {
        config
            .event_listeners
            .emit(&CircuitBreakerEvent::CallPermitted {
                component: config.name.clone(),
                timestamp: Instant::now(),
                state: self.state,
            });
    }

    fn transition_to(&mut self, state: CircuitState, config: &CircuitBreakerConfig) {
        if self.state == state {
            return;
        }

        let from_state = self.state;
        config
            .event_listeners
            .emit(&CircuitBreakerEvent::StateTransition {
                component: config.name.clone(),
                timestamp: Instant::now(),
                from_state,
                to_state: state,
            });

        tracing::info!(
            breaker = %config.name,
            from = ?from_state,
            to = ?state,
            "circuit state transition"
        );

        self.state = state;
        self.state_atomic.store(state as u8, Ordering::Release);
        self.last_state_change = Instant::now();
        self.failures.clear();
        self.half_open_admitted = 0;
    }
}
