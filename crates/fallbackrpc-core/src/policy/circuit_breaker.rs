//! Two-state circuit breaker: Closed → Open → Closed.
//!
//! State transitions:
//! - `Closed` → `Open`:   a failure pushes the count to `failure_threshold`
//! - `Open` → `Closed`:   `cooldown` has elapsed since the last failure, observed
//!   lazily by [`CircuitBreaker::try_reset`]; the failure count starts over
//! - any → `Closed`:      a success
//!
//! There is no half-open probe state. Once the cool-down has passed the
//! endpoint is simply eligible again, and enough fresh failures reopen it.
//!
//! The breaker holds no lock of its own; it lives inside the endpoint
//! registry, which serializes access.

use std::time::Duration;

use tokio::time::Instant;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests allowed, failures counted.
    Closed,
    /// Endpoint skipped by selection until the cool-down elapses.
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening.
    pub failure_threshold: u32,
    /// How long after the last failure an open circuit stays open.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Per-endpoint failure-counting breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker in `Closed` state.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    /// Consecutive failures since the last success or reset.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    /// Record a success: always closes the circuit.
    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
    }

    /// Record a failure observed at `now`.
    ///
    /// Returns `true` if this failure opened the circuit.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure = Some(now);
        if self.state == CircuitState::Closed
            && self.failure_count >= self.config.failure_threshold
        {
            self.state = CircuitState::Open;
            return true;
        }
        false
    }

    /// Close an open circuit whose cool-down has elapsed by `now`.
    ///
    /// Returns `true` if the circuit was closed by this call.
    pub fn try_reset(&mut self, now: Instant) -> bool {
        if self.state != CircuitState::Open {
            return false;
        }
        let elapsed = match self.last_failure {
            Some(at) => now.saturating_duration_since(at),
            None => return false,
        };
        if elapsed > self.config.cooldown {
            self.state = CircuitState::Closed;
            self.failure_count = 0;
            return true;
        }
        false
    }
}
