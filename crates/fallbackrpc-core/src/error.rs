//! Transport-level and configuration error types.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Transient network fault codes reported by a transport when no usable
/// response was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultCode {
    /// The remote host actively refused the connection.
    ConnectionRefused,
    /// The host name could not be resolved.
    NameNotFound,
    /// The connection or the exchange timed out.
    TimedOut,
    /// The peer reset the connection.
    ConnectionReset,
    /// The connection was aborted locally.
    ConnectionAborted,
    /// Any other network-level failure.
    Network,
}

impl std::fmt::Display for FaultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::NameNotFound => write!(f, "name not found"),
            Self::TimedOut => write!(f, "timed out"),
            Self::ConnectionReset => write!(f, "connection reset"),
            Self::ConnectionAborted => write!(f, "connection aborted"),
            Self::Network => write!(f, "network fault"),
        }
    }
}

/// Errors that can occur while dispatching a request.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No response was received (refused, reset, DNS failure, ...).
    #[error("Network error ({code}): {message}")]
    Connection { code: FaultCode, message: String },

    /// A single attempt exceeded its deadline.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The endpoint answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Response body could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// Every endpoint's circuit was open at selection time.
    #[error("All endpoints unavailable{}", last_error_suffix(.last))]
    AllEndpointsUnavailable { last: Option<String> },

    /// Failover ran through every endpoint without a success.
    #[error("All endpoints failed after {attempts} attempt(s); last error: {last}")]
    Exhausted {
        attempts: usize,
        last: Box<TransportError>,
    },

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

fn last_error_suffix(last: &Option<String>) -> String {
    match last {
        Some(msg) => format!("; last error: {msg}"),
        None => String::new(),
    }
}

impl TransportError {
    /// Returns `true` if this error is transient: worth retrying locally and
    /// failing over to another endpoint.
    pub fn is_retryable(&self) -> bool {
        crate::classify::is_retryable(self)
    }

    /// Returns `true` if this is a node-side execution error.
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// Returns `true` for the synthesized "nothing left to try" errors.
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::AllEndpointsUnavailable { .. } | Self::Exhausted { .. }
        )
    }
}

/// Invalid client configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No endpoint URLs were configured.
    #[error("at least one endpoint URL is required")]
    NoEndpoints,

    /// An endpoint URL was blank.
    #[error("endpoint URL at position {index} is empty")]
    EmptyUrl { index: usize },

    /// A count or duration that must be positive was zero.
    #[error("`{field}` must be greater than zero")]
    NotPositive { field: &'static str },

    /// An environment/flag value could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}
