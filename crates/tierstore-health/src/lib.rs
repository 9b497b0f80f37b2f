//! Graceful-degradation health tracking.
//!
//! One [`HealthTracker`] owns a state machine per guarded operation class
//! (reads, writes, deletes, lists). Components degrade through
//! `Healthy -> Degraded -> ReadOnly -> Unavailable` as consecutive failures
//! accumulate inside the observation window, and recover to `Healthy` after
//! a configurable run of consecutive successes.
//!
//! Gates:
//! - [`HealthTracker::check_read`] passes unless the component is
//!   `Unavailable`.
//! - [`HealthTracker::check_write`] passes only in `Healthy` or `Degraded`.
//!
//! A rejected gate never reaches the remote store; callers surface it as a
//! service-unavailable error annotated with the component state.
//!
//! State-change subscribers run synchronously, before the new state is
//! observable through [`HealthTracker::state`]; they must not re-enter the
//! tracker.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use thiserror::Error;

/// Health state of one guarded component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum HealthState {
    /// Fully operational.
    Healthy,
    /// Errors observed; writes still allowed.
    Degraded,
    /// Writes are rejected; reads still pass.
    ReadOnly,
    /// All operations are rejected.
    Unavailable,
}

impl HealthState {
    /// Whether reads pass the gate in this state.
    pub fn can_read(&self) -> bool {
        !matches!(self, HealthState::Unavailable)
    }

    /// Whether writes pass the gate in this state.
    pub fn can_write(&self) -> bool {
        matches!(self, HealthState::Healthy | HealthState::Degraded)
    }

    fn degraded_once(&self) -> HealthState {
        match self {
            HealthState::Healthy => HealthState::Degraded,
            HealthState::Degraded => HealthState::ReadOnly,
            HealthState::ReadOnly | HealthState::Unavailable => HealthState::Unavailable,
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::ReadOnly => "read-only",
            HealthState::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// The kind of operation that produced a success or failure signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
}

/// Error returned by a denied gate.
#[derive(Debug, Clone, Error)]
#[error("component '{component}' is {state}; operation not permitted")]
pub struct HealthGateError {
    pub component: String,
    pub state: HealthState,
}

/// Tracker tuning knobs.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive failures within the window per degradation step.
    pub failure_threshold: usize,
    /// Observation window; failures older than this are forgotten.
    pub window: Duration,
    /// Consecutive successes required to return to `Healthy`.
    pub recovery_threshold: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            recovery_threshold: 3,
        }
    }
}

/// Point-in-time record of one component, as exposed by telemetry.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ComponentHealthRecord {
    pub component: String,
    pub state: HealthState,
    pub consecutive_failures: usize,
    pub consecutive_successes: usize,
    pub last_transition: SystemTime,
}

struct Component {
    state: HealthState,
    failures: VecDeque<Instant>,
    consecutive_failures: usize,
    consecutive_successes: usize,
    last_transition: SystemTime,
}

impl Component {
    fn new() -> Self {
        Self {
            state: HealthState::Healthy,
            failures: VecDeque::new(),
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_transition: SystemTime::now(),
        }
    }
}

type Subscriber = Box<dyn Fn(&str, HealthState, HealthState) + Send + Sync>;

/// Per-component health state machines behind one lock.
pub struct HealthTracker {
    config: HealthConfig,
    inner: Mutex<Inner>,
}

struct Inner {
    components: HashMap<String, Component>,
    subscribers: Vec<Subscriber>,
}

impl HealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                components: HashMap::new(),
                subscribers: Vec::new(),
            }),
        }
    }

    /// Registers a component so it shows up in snapshots before any signal.
    pub fn register(&self, component: &str) {
        self.inner
            .lock()
            .unwrap()
            .components
            .entry(component.to_string())
            .or_insert_with(Component::new);
    }

    /// Subscribes to state transitions. Callbacks run synchronously under
    /// the tracker lock and must not call back into the tracker.
    pub fn subscribe<F>(&self, f: F)
    where
        F: Fn(&str, HealthState, HealthState) + Send + Sync + 'static,
    {
        self.inner.lock().unwrap().subscribers.push(Box::new(f));
    }

    /// Records a successful operation for the component.
    pub fn record_success(&self, component: &str) {
        let mut inner = self.inner.lock().unwrap();
        let recovery = self.config.recovery_threshold;
        let entry = inner
            .components
            .entry(component.to_string())
            .or_insert_with(Component::new);
        entry.consecutive_failures = 0;
        entry.failures.clear();
        entry.consecutive_successes += 1;

        if entry.state != HealthState::Healthy && entry.consecutive_successes >= recovery {
            Self::transition(&mut inner, component, HealthState::Healthy);
        }
    }

    /// Records a failed operation for the component.
    ///
    /// Each run of `failure_threshold` consecutive failures inside the
    /// window degrades the component one step. An explicit write failure in
    /// `Degraded` moves straight to `ReadOnly`; a read failure while
    /// `ReadOnly` escalates toward `Unavailable`.
    pub fn record_failure(&self, component: &str, kind: OperationKind) {
        let mut inner = self.inner.lock().unwrap();
        let threshold = self.config.failure_threshold;
        let window = self.config.window;
        let entry = inner
            .components
            .entry(component.to_string())
            .or_insert_with(Component::new);
        entry.consecutive_successes = 0;

        let now = Instant::now();
        entry.failures.push_back(now);
        while let Some(first) = entry.failures.front() {
            if now.duration_since(*first) > window {
                entry.failures.pop_front();
            } else {
                break;
            }
        }
        entry.consecutive_failures += 1;

        let windowed = entry.failures.len();
        let state = entry.state;

        let next = if state == HealthState::Degraded && kind == OperationKind::Write {
            Some(HealthState::ReadOnly)
        } else if windowed >= threshold {
            Some(state.degraded_once())
        } else {
            None
        };

        if let Some(next) = next {
            if next != state {
                // A degradation step consumes the windowed failures.
                entry.failures.clear();
                Self::transition(&mut inner, component, next);
            }
        }
    }

    fn transition(inner: &mut Inner, component: &str, to: HealthState) {
        let entry = inner
            .components
            .get_mut(component)
            .expect("component present");
        let from = entry.state;
        if from == to {
            return;
        }
        entry.state = to;
        entry.last_transition = SystemTime::now();
        if to == HealthState::Healthy {
            entry.consecutive_failures = 0;
            entry.consecutive_successes = 0;
            entry.failures.clear();
        }

        tracing::info!(component, from = %from, to = %to, "component health transition");
        for subscriber in &inner.subscribers {
            subscriber(component, from, to);
        }
    }

    /// Current state of a component (`Healthy` when never seen).
    pub fn state(&self, component: &str) -> HealthState {
        self.inner
            .lock()
            .unwrap()
            .components
            .get(component)
            .map(|c| c.state)
            .unwrap_or(HealthState::Healthy)
    }

    /// Gate for read-class operations.
    pub fn check_read(&self, component: &str) -> Result<(), HealthGateError> {
        let state = self.state(component);
        if state.can_read() {
            Ok(())
        } else {
            Err(HealthGateError {
                component: component.to_string(),
                state,
            })
        }
    }

    /// Gate for write-class operations.
    pub fn check_write(&self, component: &str) -> Result<(), HealthGateError> {
        let state = self.state(component);
        if state.can_write() {
            Ok(())
        } else {
            Err(HealthGateError {
                component: component.to_string(),
                state,
            })
        }
    }

    /// Snapshot of every registered component.
    pub fn snapshot(&self) -> Vec<ComponentHealthRecord> {
        let inner = self.inner.lock().unwrap();
        let mut records: Vec<ComponentHealthRecord> = inner
            .components
            .iter()
            .map(|(name, c)| ComponentHealthRecord {
                component: name.clone(),
                state: c.state,
                consecutive_failures: c.consecutive_failures,
                consecutive_successes: c.consecutive_successes,
                last_transition: c.last_transition,
            })
            .collect();
        records.sort_by(|a, b| a.component.cmp(&b.component));
        records
    }
}
