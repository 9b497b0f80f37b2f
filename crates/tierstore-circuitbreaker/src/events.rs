use std::time::Instant;

use tierstore_core::StorageEvent;

use crate::circuit::CircuitState;

/// Events emitted by a circuit breaker.
#[derive(Debug, Clone)]
pub enum CircuitBreakerEvent {
    /// The breaker moved between states.
    StateTransition {
        component: String,
        timestamp: Instant,
        from_state: CircuitState,
        to_state: CircuitState,
    },
    /// A call was admitted.
    CallPermitted {
        component: String,
        timestamp: Instant,
        state: CircuitState,
    },
    /// A call was rejected because the circuit is open.
    CallRejected {
        component: String,
        timestamp: Instant,
    },
    /// A guarded call finished successfully.
    SuccessRecorded {
        component: String,
        timestamp: Instant,
        state: CircuitState,
    },
    /// A guarded call failed.
    FailureRecorded {
        component: String,
        timestamp: Instant,
        state: CircuitState,
    },
}

impl StorageEvent for CircuitBreakerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CircuitBreakerEvent::StateTransition { .. } => "StateTransition",
            CircuitBreakerEvent::CallPermitted { .. } => "CallPermitted",
            CircuitBreakerEvent::CallRejected { .. } => "CallRejected",
            CircuitBreakerEvent::SuccessRecorded { .. } => "SuccessRecorded",
            CircuitBreakerEvent::FailureRecorded { .. } => "FailureRecorded",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CircuitBreakerEvent::StateTransition { timestamp, .. }
            | CircuitBreakerEvent::CallPermitted { timestamp, .. }
            | CircuitBreakerEvent::CallRejected { timestamp, .. }
            | CircuitBreakerEvent::SuccessRecorded { timestamp, .. }
            | CircuitBreakerEvent::FailureRecorded { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            CircuitBreakerEvent::StateTransition { component, .. }
            | CircuitBreakerEvent::CallPermitted { component, .. }
            | CircuitBreakerEvent::CallRejected { component, .. }
            | CircuitBreakerEvent::SuccessRecorded { component, .. }
            | CircuitBreakerEvent::FailureRecorded { component, .. } => component,
        }
    }
}
