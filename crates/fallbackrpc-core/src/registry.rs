//! Endpoint registry: sole owner of per-endpoint health, breaker and
//! metrics state, plus the round-robin cursor.
//!
//! All state sits behind one mutex. Callers interact only through the narrow
//! operations below, none of which hold the lock across an `.await`.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::policy::{CircuitBreaker, CircuitBreakerConfig};

/// Cumulative traffic counters for one endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EndpointMetrics {
    /// Attempt sequences dispatched to the endpoint (health probes included).
    pub total_requests: u64,
    pub total_success: u64,
    pub total_failure: u64,
    /// Running mean over all completed outcomes, successes and failures.
    pub average_duration_ms: f64,
}

impl EndpointMetrics {
    fn record_outcome(&mut self, success: bool, duration: Duration) {
        if success {
            self.total_success += 1;
        } else {
            self.total_failure += 1;
        }
        let n = (self.total_success + self.total_failure) as f64;
        let duration_ms = duration.as_secs_f64() * 1000.0;
        self.average_duration_ms = (self.average_duration_ms * (n - 1.0) + duration_ms) / n;
    }

    /// Fraction of completed outcomes that succeeded, if any completed.
    pub fn success_rate(&self) -> Option<f64> {
        let completed = self.total_success + self.total_failure;
        (completed > 0).then(|| self.total_success as f64 / completed as f64)
    }
}

/// Point-in-time view of one endpoint, as returned by
/// [`EndpointRegistry::snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointHealth {
    pub address: String,
    /// Outcome of the most recent attempt or probe.
    pub healthy: bool,
    pub failure_count: u32,
    pub circuit_open: bool,
    pub metrics: EndpointMetrics,
}

/// An endpoint chosen by [`EndpointRegistry::select_next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub index: usize,
    pub address: String,
}

#[derive(Debug)]
struct EndpointRecord {
    address: String,
    healthy: bool,
    circuit: CircuitBreaker,
    metrics: EndpointMetrics,
}

#[derive(Debug)]
struct RegistryState {
    endpoints: Vec<EndpointRecord>,
    cursor: usize,
}

/// Ordered endpoint records with round-robin selection.
#[derive(Debug)]
pub struct EndpointRegistry {
    state: Mutex<RegistryState>,
}

impl EndpointRegistry {
    /// One record per address, in the given order. Index 0 is the primary.
    pub fn new<I, S>(addresses: I, breaker: CircuitBreakerConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints = addresses
            .into_iter()
            .map(|address| EndpointRecord {
                address: address.into(),
                healthy: true,
                circuit: CircuitBreaker::new(breaker.clone()),
                metrics: EndpointMetrics::default(),
            })
            .collect();
        Self {
            state: Mutex::new(RegistryState {
                endpoints,
                cursor: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().endpoints.is_empty()
    }

    /// Configured addresses, in order.
    pub fn addresses(&self) -> Vec<String> {
        self.lock()
            .endpoints
            .iter()
            .map(|e| e.address.clone())
            .collect()
    }

    /// Current round-robin position.
    pub fn cursor(&self) -> usize {
        self.lock().cursor
    }

    /// Select the next endpoint whose circuit is closed.
    pub fn select_next(&self) -> Option<Selection> {
        self.select_next_at(Instant::now())
    }

    /// [`select_next`](Self::select_next) with an explicit clock reading.
    ///
    /// Open circuits whose cool-down has elapsed by `now` are closed first,
    /// then endpoints are scanned round-robin from the cursor. The cursor
    /// moves one past the selected endpoint. Returns `None` when every
    /// circuit is open.
    pub fn select_next_at(&self, now: Instant) -> Option<Selection> {
        let mut state = self.lock();
        let len = state.endpoints.len();
        if len == 0 {
            return None;
        }

        for endpoint in state.endpoints.iter_mut() {
            if endpoint.circuit.try_reset(now) {
                tracing::info!(
                    endpoint = %endpoint.address,
                    "circuit breaker reset after cool-down"
                );
            }
        }

        let start = state.cursor % len;
        let index = (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&idx| !state.endpoints[idx].circuit.is_open())?;

        state.cursor = (index + 1) % len;
        let address = state.endpoints[index].address.clone();
        tracing::debug!(endpoint = %address, index, "selected endpoint");
        Some(Selection { index, address })
    }

    /// Point the cursor back at the primary endpoint.
    pub fn reset_cursor(&self) {
        self.lock().cursor = 0;
    }

    /// Count one dispatched attempt sequence against `index`.
    pub fn record_attempt(&self, index: usize) {
        if let Some(endpoint) = self.lock().endpoints.get_mut(index) {
            endpoint.metrics.total_requests += 1;
        }
    }

    /// Record a successful outcome: metrics, healthy flag, breaker closed.
    pub fn record_success(&self, index: usize, duration: Duration) {
        if let Some(endpoint) = self.lock().endpoints.get_mut(index) {
            endpoint.metrics.record_outcome(true, duration);
            endpoint.healthy = true;
            endpoint.circuit.record_success();
        }
    }

    /// Record a failed outcome observed at `now`.
    ///
    /// Returns `true` if this failure opened the endpoint's circuit.
    pub fn record_failure(&self, index: usize, duration: Duration, now: Instant) -> bool {
        let mut state = self.lock();
        let Some(endpoint) = state.endpoints.get_mut(index) else {
            return false;
        };
        endpoint.metrics.record_outcome(false, duration);
        endpoint.healthy = false;
        let opened = endpoint.circuit.record_failure(now);
        if opened {
            tracing::warn!(
                endpoint = %endpoint.address,
                failures = endpoint.circuit.failure_count(),
                "circuit breaker → open"
            );
        }
        opened
    }

    /// Snapshot of every endpoint. Pure read: open circuits past their
    /// cool-down are reported as open until the next selection.
    pub fn snapshot(&self) -> Vec<EndpointHealth> {
        self.lock()
            .endpoints
            .iter()
            .map(|e| EndpointHealth {
                address: e.address.clone(),
                healthy: e.healthy,
                failure_count: e.circuit.failure_count(),
                circuit_open: e.circuit.is_open(),
                metrics: e.metrics,
            })
            .collect()
    }
}
