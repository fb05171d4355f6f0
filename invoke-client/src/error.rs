//! Invocation error types.

use invoke_discovery::DiscoveryError;
use std::time::Duration;
use thiserror::Error;

/// Result type for invocation operations.
pub type Result<T> = std::result::Result<T, InvokeError>;

/// Invocation errors.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// Invalid engine options.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No discovery function was configured.
    #[error("Discovery not configured")]
    DiscoveryNotConfigured,

    /// The discovery function failed.
    #[error("Discovery failed: {0}")]
    DiscoveryFailed(#[from] DiscoveryError),

    /// A route token in the path template could not be resolved.
    #[error("Routing error: {0}")]
    Routing(String),

    /// Discovery resolved an empty host.
    #[error("Remote is empty")]
    EmptyRemote,

    /// Request building error (headers, payload marshal, URL assembly).
    #[error("Failed to build request: {0}")]
    Build(String),

    /// Network-level failure.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx response status.
    #[error("Response with bad status: {code}")]
    Status {
        /// HTTP status code.
        code: u16,
    },

    /// Response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Circuit breaker is open, request rejected.
    #[error("Circuit breaker is open, request rejected")]
    OpenCircuit,

    /// Concurrency ceiling reached, request rejected.
    #[error("Max concurrency reached, request rejected")]
    ConcurrencyLimit,

    /// Guarded call exceeded the circuit timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's cancellation token fired.
    #[error("Request cancelled")]
    Cancelled,

    /// Application-level failure reported inside a response envelope.
    #[error("Remote error {code}: {message}")]
    Remote {
        /// Application error code.
        code: i64,
        /// Application error message.
        message: String,
    },
}

impl InvokeError {
    /// Get the HTTP status code if this is a status error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code } => Some(*code),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Check if the circuit layer rejected the call without running it.
    pub fn is_circuit_rejection(&self) -> bool {
        matches!(self, Self::OpenCircuit | Self::ConcurrencyLimit)
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_)) || matches!(self, Self::Transport(e) if e.is_timeout())
    }

    /// Code reported to telemetry on failure.
    pub(crate) fn report_code(&self) -> i64 {
        self.status_code().map(i64::from).unwrap_or(-1)
    }
}

impl From<serde_json::Error> for InvokeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_carries_only_code() {
        let err = InvokeError::Status { code: 503 };
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(err.report_code(), 503);
        assert_eq!(err.to_string(), "Response with bad status: 503");
    }

    #[test]
    fn test_rejections() {
        assert!(InvokeError::OpenCircuit.is_circuit_rejection());
        assert!(InvokeError::ConcurrencyLimit.is_circuit_rejection());
        assert!(!InvokeError::Timeout(Duration::from_secs(1)).is_circuit_rejection());
        assert!(InvokeError::Timeout(Duration::from_secs(1)).is_timeout());
        assert_eq!(InvokeError::OpenCircuit.report_code(), -1);
    }

    #[test]
    fn test_discovery_error_converts() {
        let err: InvokeError = DiscoveryError::ServiceNotFound("users".into()).into();
        assert!(matches!(err, InvokeError::DiscoveryFailed(_)));
        assert_eq!(err.to_string(), "Discovery failed: Service not found: users");
    }
}
