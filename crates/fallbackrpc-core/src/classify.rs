//! Retryability classification over a normalized fault shape.
//!
//! The classifier never looks at a concrete HTTP library's error type. Any
//! error that can describe itself as a [`FaultShape`] can be classified:
//!
//! 1. no response received → retryable
//! 2. transient network [`FaultCode`] → retryable
//! 3. status ≥ 500 → retryable
//! 4. status 429 → retryable
//! 5. message mentions "network error" or "timeout" → retryable
//! 6. anything else (4xx, RPC errors, bad bodies) → terminal

use crate::error::{FaultCode, TransportError};

/// The parts of a failure the classifier cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultShape {
    /// Whether any response was received from the remote side.
    pub responded: bool,
    /// HTTP-equivalent status code, if one was received.
    pub status: Option<u16>,
    /// Transport fault code, if the failure was network-level.
    pub code: Option<FaultCode>,
    /// Human-readable message.
    pub message: String,
}

/// Errors that can be reduced to a [`FaultShape`].
pub trait Classify {
    fn fault_shape(&self) -> FaultShape;
}

/// Returns `true` if `err` is transient.
pub fn is_retryable<E: Classify + ?Sized>(err: &E) -> bool {
    is_retryable_shape(&err.fault_shape())
}

/// Applies the classification rules, in priority order, to a raw shape.
pub fn is_retryable_shape(shape: &FaultShape) -> bool {
    if !shape.responded {
        return true;
    }
    if shape.code.is_some() {
        return true;
    }
    if let Some(status) = shape.status {
        if status >= 500 || status == 429 {
            return true;
        }
    }
    let message = shape.message.to_lowercase();
    message.contains("network error") || message.contains("timeout")
}

impl Classify for TransportError {
    fn fault_shape(&self) -> FaultShape {
        // A status error's body is server-controlled text and stays out of
        // the message check.
        let message = match self {
            Self::Status { status, .. } => format!("HTTP {status}"),
            _ => self.to_string(),
        };
        match self {
            Self::Connection { code, .. } => FaultShape {
                responded: false,
                status: None,
                code: Some(*code),
                message,
            },
            Self::Timeout { .. } => FaultShape {
                responded: false,
                status: None,
                code: Some(FaultCode::TimedOut),
                message,
            },
            Self::Status { status, .. } => FaultShape {
                responded: true,
                status: Some(*status),
                code: None,
                message,
            },
            _ => FaultShape {
                responded: true,
                status: None,
                code: None,
                message,
            },
        }
    }
}
