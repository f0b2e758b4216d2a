//! Circuit breaker for adapter call sites.
//!
//! Prevents hammering an exchange backend that is failing consistently.
//! One breaker instance lives per adapter call site for the adapter's
//! lifetime.
//!
//! # State Machine
//!
//! ```text
//! CLOSED → OPEN (consecutive failures >= failure_threshold)
//! OPEN → HALF_OPEN (recovery_timeout elapsed, evaluated on the next call)
//! HALF_OPEN → CLOSED (test call succeeds, failure count reset)
//! HALF_OPEN → OPEN (test call fails)
//! ```
//!
//! The OPEN → HALF_OPEN transition is lazy: it happens when a call is
//! attempted after the timeout, never on a background timer. The breaker is
//! a decision gate, not a retry mechanism — compose it *outside* a retry so
//! an exhausted retry run counts as one failure.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected without touching the adapter.
    Open,
    /// A test call is allowed through.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration, immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit (default: 5).
    pub failure_threshold: u32,
    /// Time to stay open before permitting a test call (default: 60s).
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Profile for the v2 exchange client.
    ///
    /// Trips faster and recovers sooner — v2 calls are already retried
    /// internally, so each breaker failure represents an exhausted retry run.
    #[must_use]
    pub const fn live_v2() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the wrapped operation was not invoked.
    #[error("circuit breaker '{name}' is open, retry in {retry_in:?}")]
    Open {
        /// Breaker name.
        name: String,
        /// Time until the next test call is permitted.
        retry_in: Duration,
    },
    /// The wrapped operation ran and failed.
    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
}

/// Circuit breaker guarding calls to one adapter backend.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    state_transitions: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                opened_at: None,
            }),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            state_transitions: AtomicU64::new(0),
        }
    }

    /// Get the breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, applying any pending OPEN → HALF_OPEN transition.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Whether a call would be permitted right now.
    ///
    /// Transitions OPEN → HALF_OPEN when the recovery timeout has elapsed.
    #[must_use]
    pub fn is_call_permitted(&self) -> bool {
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner);
        inner.state != CircuitState::Open
    }

    /// Run `op` behind the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitBreakerError::Open`] without invoking `op` while the
    /// circuit is open and the recovery timeout has not elapsed. Failures of
    /// `op` itself are passed through as [`CircuitBreakerError::Inner`].
    pub async fn call<T, E, F>(&self, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: AsyncFnOnce() -> Result<T, E>,
    {
        if !self.is_call_permitted() {
            return Err(CircuitBreakerError::Open {
                name: self.name.clone(),
                retry_in: self.retry_in(),
            });
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    /// Record a successful call.
    ///
    /// Resets the failure count; closes the circuit from HALF_OPEN.
    pub fn record_success(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.last_failure = None;

        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            self.state_transitions.fetch_add(1, Ordering::Relaxed);
            drop(inner);
            tracing::info!(
                name = %self.name,
                from = "HALF_OPEN",
                to = "CLOSED",
                "Circuit breaker closed"
            );
        }
    }

    /// Record a failed call.
    ///
    /// Opens the circuit once the consecutive-failure threshold is reached,
    /// or immediately when the failure happened on a HALF_OPEN test call.
    pub fn record_failure(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.lock();
        let now = Instant::now();
        inner.failure_count += 1;
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    let failures = inner.failure_count;
                    self.open(&mut inner, now);
                    drop(inner);
                    tracing::warn!(
                        name = %self.name,
                        failures,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.open(&mut inner, now);
                drop(inner);
                tracing::warn!(
                    name = %self.name,
                    "Circuit breaker reopened after failed test call"
                );
            }
            CircuitState::Open => {
                drop(inner);
                tracing::warn!(
                    name = %self.name,
                    "Call recorded while circuit is OPEN"
                );
            }
        }
    }

    /// Time remaining until the breaker permits a test call.
    #[must_use]
    pub fn retry_in(&self) -> Duration {
        let inner = self.lock();
        inner.opened_at.map_or(Duration::ZERO, |opened| {
            self.config.recovery_timeout.saturating_sub(opened.elapsed())
        })
    }

    /// Point-in-time snapshot for status reporting.
    #[must_use]
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state();
        let inner = self.lock();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state,
            failure_count: inner.failure_count,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
        }
    }

    /// Force the circuit open (operator action or tests).
    pub fn force_open(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Open {
            self.open(&mut inner, Instant::now());
        }
    }

    /// Force the circuit closed (operator action or tests).
    pub fn force_close(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.opened_at = None;
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn open(&self, inner: &mut BreakerInner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
    }

    fn maybe_half_open(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open
            && let Some(opened) = inner.opened_at
            && opened.elapsed() >= self.config.recovery_timeout
        {
            inner.state = CircuitState::HalfOpen;
            self.state_transitions.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                name = %self.name,
                from = "OPEN",
                to = "HALF_OPEN",
                "Circuit breaker testing"
            );
        }
    }
}

/// Point-in-time view of a circuit breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    /// Breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Current consecutive-failure count.
    pub failure_count: u32,
    /// Total calls observed.
    pub total_calls: u64,
    /// Total failures observed.
    pub total_failures: u64,
    /// Number of state transitions.
    pub state_transitions: u64,
}
