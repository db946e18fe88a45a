//! Reliability policies applied per endpoint.
//!
//! ```text
//! Request → [CircuitBreaker: skip open endpoints] → [RetryPolicy: local attempts] → [Transport]
//! ```

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{RetryConfig, RetryPolicy};
