//! The `HttpTransport` trait: the seam between the dispatcher and an HTTP
//! library.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;

/// Aggregate health of a client's endpoint set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Every endpoint's circuit is closed.
    Healthy,
    /// Some endpoints are isolated, at least one is usable.
    Degraded,
    /// Every endpoint's circuit is open.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// One-shot HTTP exchange against a fully-qualified URL.
///
/// Implementations perform exactly one attempt per call: no retries, no
/// failover. Deadlines are enforced by the caller, so implementations need
/// not apply their own. Failures must be reported as the most specific
/// [`TransportError`] variant available, since the dispatcher classifies
/// them to decide between retry, failover and abort.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` and are shared as
/// `Arc<dyn HttpTransport>`.
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    /// POST `body` as JSON and return the parsed JSON response body.
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, TransportError>;

    /// GET `url`, succeeding on any 2xx status. Used for liveness probes.
    async fn get(&self, url: &str) -> Result<(), TransportError>;
}

/// Appends `path` to `base` with exactly one `/` between them.
///
/// An empty path yields `base` unchanged.
pub fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
