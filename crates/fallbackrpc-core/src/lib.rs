//! fallbackrpc-core: failover dispatch for ranked JSON-RPC endpoints.
//!
//! # Overview
//!
//! Given an ordered list of endpoint URLs, [`FallbackClient`] sends each
//! request to the first eligible endpoint, retries transient failures locally
//! with exponential backoff, isolates failing endpoints behind circuit
//! breakers, and fails over to the next endpoint when one gives up.
//!
//! - [`FallbackClient`]: the failover dispatcher and health reporting
//! - [`EndpointRegistry`]: per-endpoint health, breaker and metrics state
//! - [`policy`]: circuit breaker and retry/backoff
//! - [`classify`]: retryable vs. terminal error classification
//! - [`HttpTransport`]: the async seam an HTTP library plugs into
//! - [`ClientConfig`]: configuration, validation, environment loading

pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod policy;
pub mod registry;
pub mod request;
pub mod transport;

pub use classify::{is_retryable, Classify, FaultShape};
pub use client::{FallbackClient, HEALTH_CHECK_PATH, HEALTH_CHECK_TIMEOUT};
pub use config::ClientConfig;
pub use error::{ConfigError, FaultCode, TransportError};
pub use registry::{EndpointHealth, EndpointMetrics, EndpointRegistry, Selection};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use transport::{join_url, HealthStatus, HttpTransport};
