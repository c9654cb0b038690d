//! Circuit Breaker Implementation
//!
//! This module provides a per-service circuit breaker that keeps a failing
//! service from dragging down its callers. The breaker follows a state machine
//! with three states: Closed, Open, and HalfOpen.
//!
//! ## States:
//! - **Closed**: Normal operation, requests pass through. Consecutive failures are
//!   counted and a success resets the count.
//! - **Open**: Requests fail fast without reaching the load balancer. Once
//!   `open_timeout` has elapsed since the last failure, the next request moves the
//!   breaker to HalfOpen. The transition is evaluated lazily, at request time.
//! - **HalfOpen**: Exactly one trial request is in flight. Its success closes the
//!   circuit, its failure reopens it. Every other request is rejected meanwhile.
//!
//! ## Admission
//!
//! `try_acquire` checks the state, performs any transition, and admits the request
//! under one mutex acquisition, so two callers can never both win the
//! Open -> HalfOpen race. An admitted request holds a [`CircuitPermit`] that must
//! be resolved with `record_success` or `record_failure`. A permit dropped without
//! an outcome (for example a cancelled future) counts as a failure, which keeps the
//! breaker from sticking in HalfOpen forever. A request that ends without saying
//! anything about service health calls `release` instead: the failure count is left
//! alone and an unresolved trial hands the circuit back to Open with its timeout
//! already elapsed, so the next request becomes the trial.
//!
//! Each permit remembers the generation it was issued in. Outcomes that arrive
//! after the breaker has moved to another state are ignored: a slow request
//! admitted while Closed cannot close a circuit whose half-open trial is running.
//!
//! ## Key Rust Concepts:
//! - `parking_lot::Mutex` guards the state machine (no lock poisoning, no unwrap)
//! - `Arc<Self>` receivers let a permit keep its breaker alive
//! - `Drop` gives the permit a guaranteed outcome
//! - `AtomicU64` for lock-free counters read by status queries

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::core::clock::SharedClock;
use crate::core::error::{OrchestratorError, OrchestratorResult};
use crate::observability::events::{EventBus, EventType, OrchestrationEvent};

/// Circuit breaker state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    /// Circuit is closed, normal operation
    /// Tracks the number of consecutive failures
    Closed { failure_count: u32 },

    /// Circuit is open, requests fail fast
    /// Records the failure that opened (or reopened) it
    Open { last_failure_time: Instant },

    /// Circuit is half-open, a single trial is in flight
    /// Keeps the failure that opened it so a released trial can hand it back
    HalfOpen {
        trial_started_at: Instant,
        last_failure_time: Instant,
    },
}

impl CircuitBreakerState {
    /// State without its payload
    pub fn kind(&self) -> CircuitState {
        match self {
            CircuitBreakerState::Closed { .. } => CircuitState::Closed,
            CircuitBreakerState::Open { .. } => CircuitState::Open,
            CircuitBreakerState::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

/// Breaker state as reported to administrative queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// How long to wait after the last failure before allowing a trial
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub service: String,
    pub state: CircuitState,
    /// Consecutive failures; only meaningful while closed
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub times_opened: u64,
    pub rejected_requests: u64,
}

struct Inner {
    state: CircuitBreakerState,
    generation: u64,
}

/// Per-service circuit breaker
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    inner: Mutex<Inner>,
    times_opened: AtomicU64,
    rejected_requests: AtomicU64,
    events: Option<Arc<EventBus>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

type Transition = (CircuitState, CircuitState, String);

impl CircuitBreaker {
    /// Create a new closed circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(Inner {
                state: CircuitBreakerState::Closed { failure_count: 0 },
                generation: 0,
            }),
            times_opened: AtomicU64::new(0),
            rejected_requests: AtomicU64::new(0),
            events: None,
        }
    }

    /// Publish state transitions to an event bus
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Ask permission to send one request
    ///
    /// Returns `CircuitOpen` while the circuit is open and its timeout has not
    /// elapsed, and while a half-open trial is in flight.
    pub fn try_acquire(self: &Arc<Self>) -> OrchestratorResult<CircuitPermit> {
        let now = self.clock.now();
        let mut transition = None;

        let admitted = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitBreakerState::Closed { .. } => Some(inner.generation),
                CircuitBreakerState::Open { last_failure_time } => {
                    if now.saturating_duration_since(last_failure_time) >= self.config.open_timeout {
                        inner.state = CircuitBreakerState::HalfOpen {
                            trial_started_at: now,
                            last_failure_time,
                        };
                        inner.generation += 1;
                        transition = Some((
                            CircuitState::Open,
                            CircuitState::HalfOpen,
                            "open timeout elapsed, admitting trial request".to_string(),
                        ));
                        Some(inner.generation)
                    } else {
                        None
                    }
                }
                CircuitBreakerState::HalfOpen { .. } => None,
            }
        };

        self.publish(transition);

        match admitted {
            Some(generation) => Ok(CircuitPermit {
                breaker: Arc::clone(self),
                generation,
                resolved: false,
            }),
            None => {
                self.rejected_requests.fetch_add(1, Ordering::Relaxed);
                Err(OrchestratorError::circuit_open(self.name.clone()))
            }
        }
    }

    fn on_success(&self, generation: u64) {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                debug!(service = %self.name, "Ignoring stale success outcome");
                return;
            }
            match inner.state {
                CircuitBreakerState::Closed { .. } => {
                    inner.state = CircuitBreakerState::Closed { failure_count: 0 };
                    None
                }
                CircuitBreakerState::HalfOpen { .. } => {
                    inner.state = CircuitBreakerState::Closed { failure_count: 0 };
                    inner.generation += 1;
                    Some((
                        CircuitState::HalfOpen,
                        CircuitState::Closed,
                        "trial request succeeded".to_string(),
                    ))
                }
                CircuitBreakerState::Open { .. } => None,
            }
        };
        self.publish(transition);
    }

    fn on_failure(&self, generation: u64) {
        let now = self.clock.now();
        let transition = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                debug!(service = %self.name, "Ignoring stale failure outcome");
                return;
            }
            match inner.state {
                CircuitBreakerState::Closed { failure_count } => {
                    let failure_count = failure_count + 1;
                    if failure_count >= self.config.failure_threshold {
                        inner.state = CircuitBreakerState::Open { last_failure_time: now };
                        inner.generation += 1;
                        Some((
                            CircuitState::Closed,
                            CircuitState::Open,
                            format!("{} consecutive failures", failure_count),
                        ))
                    } else {
                        inner.state = CircuitBreakerState::Closed { failure_count };
                        None
                    }
                }
                CircuitBreakerState::HalfOpen { .. } => {
                    inner.state = CircuitBreakerState::Open { last_failure_time: now };
                    inner.generation += 1;
                    Some((
                        CircuitState::HalfOpen,
                        CircuitState::Open,
                        "trial request failed".to_string(),
                    ))
                }
                CircuitBreakerState::Open { .. } => None,
            }
        };
        self.publish(transition);
    }

    fn on_release(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        if let CircuitBreakerState::HalfOpen { last_failure_time, .. } = inner.state {
            inner.state = CircuitBreakerState::Open { last_failure_time };
            inner.generation += 1;
            debug!(service = %self.name, "Trial request released without an outcome");
        }
    }

    fn publish(&self, transition: Option<Transition>) {
        let Some((from, to, details)) = transition else {
            return;
        };
        if to == CircuitState::Open {
            self.times_opened.fetch_add(1, Ordering::Relaxed);
        }
        debug!(service = %self.name, from = %from, to = %to, "Circuit breaker transition");

        if let Some(events) = &self.events {
            let event_type = match to {
                CircuitState::Open => EventType::CircuitOpened,
                CircuitState::HalfOpen => EventType::CircuitHalfOpened,
                CircuitState::Closed => EventType::CircuitClosed,
            };
            events.publish(OrchestrationEvent::service(
                self.name.clone(),
                event_type,
                format!("{} -> {}: {}", from, to, details),
            ));
        }
    }

    /// Current state of the circuit breaker
    pub fn state(&self) -> CircuitBreakerState {
        self.inner.lock().state
    }

    /// Name of the guarded service
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Point-in-time view for status queries
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state();
        CircuitBreakerSnapshot {
            service: self.name.clone(),
            state: state.kind(),
            failure_count: match state {
                CircuitBreakerState::Closed { failure_count } => failure_count,
                _ => 0,
            },
            failure_threshold: self.config.failure_threshold,
            times_opened: self.times_opened.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
        }
    }

    /// Manually close the circuit (admin override)
    ///
    /// Outstanding permits become stale and their outcomes are ignored.
    pub fn force_close(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            let from = inner.state.kind();
            inner.state = CircuitBreakerState::Closed { failure_count: 0 };
            inner.generation += 1;
            (from != CircuitState::Closed)
                .then(|| (from, CircuitState::Closed, "manual reset".to_string()))
        };
        self.publish(transition);
    }
}

/// Admission ticket for one request through a circuit breaker
#[must_use = "a permit must be resolved with record_success, record_failure or release"]
pub struct CircuitPermit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    resolved: bool,
}

impl CircuitPermit {
    /// Report that the admitted request succeeded
    pub fn record_success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.generation);
    }

    /// Report that the admitted request failed
    pub fn record_failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.generation);
    }

    /// Give the permit back without reporting on the service's health
    pub fn release(mut self) {
        self.resolved = true;
        self.breaker.on_release(self.generation);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.on_failure(self.generation);
        }
    }
}

/// Circuit breaker registry for managing one breaker per service
pub struct CircuitBreakerRegistry {
    breakers: dashmap::DashMap<String, Arc<CircuitBreaker>>,
    clock: SharedClock,
    events: Option<Arc<EventBus>>,
}

impl CircuitBreakerRegistry {
    /// Create a new circuit breaker registry
    pub fn new(clock: SharedClock, events: Option<Arc<EventBus>>) -> Self {
        Self {
            breakers: dashmap::DashMap::new(),
            clock,
            events,
        }
    }

    /// Get or create the circuit breaker for a service
    pub fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(name) {
            return Arc::clone(breaker.value());
        }

        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            let breaker = CircuitBreaker::new(name, config, Arc::clone(&self.clock));
            let breaker = match &self.events {
                Some(events) => breaker.with_events(Arc::clone(events)),
                None => breaker,
            };
            Arc::new(breaker)
        });
        Arc::clone(entry.value())
    }

    /// Get an existing circuit breaker
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a circuit breaker
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(name).map(|(_, breaker)| breaker)
    }

    /// Snapshots of every breaker
    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        self.breakers.iter().map(|entry| entry.value().snapshot()).collect()
    }
}
