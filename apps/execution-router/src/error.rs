//! Error taxonomy for adapter calls.
//!
//! The router distinguishes four failure classes with different handling:
//!
//! | Class | Example | Handling |
//! |-------|---------|----------|
//! | Transient transport | timeout, connection reset, 5xx | retried with backoff |
//! | Sustained failure | circuit breaker open | fail fast, no adapter call |
//! | Business rejection | insufficient balance, invalid order | never retried |
//! | Configuration | unknown implementation, missing credentials | surfaced to caller |
//!
//! Business rejections at the order level are reported as a failed
//! [`crate::models::ExecutionResult`], not as an `AdapterError` — callers can
//! pattern-match transport failures without parsing error strings.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by execution adapters and the adapter factory.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Adapter failed to establish or validate its connection.
    #[error("adapter connection failed: {0}")]
    Connection(String),

    /// Circuit breaker is open; the underlying adapter was not called.
    #[error("circuit breaker '{name}' is open, retry in {retry_in:?}")]
    CircuitOpen {
        /// Name of the tripped breaker.
        name: String,
        /// Time remaining until the breaker permits a test call.
        retry_in: Duration,
    },

    /// Transport-level failure (network error, timeout, connection reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// Exchange API returned an error response.
    #[error("API error {code}: {message}")]
    Api {
        /// Error code reported by the exchange.
        code: String,
        /// Error message reported by the exchange.
        message: String,
    },

    /// Account does not hold enough balance for the requested operation.
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    /// Local clock is outside the exchange's receive window.
    #[error("timestamp out of sync with exchange: skew {skew_ms}ms")]
    TimestampSync {
        /// Observed skew between local and exchange clocks.
        skew_ms: i64,
    },

    /// Operation requires a connected adapter.
    #[error("adapter '{0}' is not connected")]
    NotConnected(&'static str),

    /// Order id unknown to the adapter.
    #[error("order not found: {0}")]
    OrderNotFound(String),
}

/// HTTP-style status codes that warrant a retry.
const RETRYABLE_API_CODES: &[&str] = &["408", "429", "502", "503", "504"];

impl AdapterError {
    /// Whether a retry has any chance of succeeding.
    ///
    /// Transport problems and clock skew are transient; auth, validation and
    /// business errors are not. Unknown API codes in the 5xx range are
    /// treated as transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::TimestampSync { .. } => true,
            Self::Api { code, .. } => {
                RETRYABLE_API_CODES.contains(&code.as_str()) || code.starts_with('5')
            }
            Self::Connection(_)
            | Self::CircuitOpen { .. }
            | Self::InsufficientBalance(_)
            | Self::NotConnected(_)
            | Self::OrderNotFound(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(AdapterError::Transport("connection reset".to_string()).is_retryable());
        assert!(AdapterError::TimestampSync { skew_ms: 7000 }.is_retryable());
    }

    #[test]
    fn test_api_code_classification() {
        let rate_limited = AdapterError::Api {
            code: "429".to_string(),
            message: "too many requests".to_string(),
        };
        assert!(rate_limited.is_retryable());

        let gateway = AdapterError::Api {
            code: "502".to_string(),
            message: "bad gateway".to_string(),
        };
        assert!(gateway.is_retryable());

        let unknown_server = AdapterError::Api {
            code: "599".to_string(),
            message: "unknown".to_string(),
        };
        assert!(unknown_server.is_retryable());

        let bad_request = AdapterError::Api {
            code: "400".to_string(),
            message: "invalid order".to_string(),
        };
        assert!(!bad_request.is_retryable());
    }

    #[test]
    fn test_business_errors_never_retry() {
        let err = AdapterError::InsufficientBalance("required 100, available 50".to_string());
        assert!(!err.is_retryable());
        assert!(!AdapterError::OrderNotFound("abc".to_string()).is_retryable());
        assert!(
            !AdapterError::CircuitOpen {
                name: "live_v2".to_string(),
                retry_in: Duration::from_secs(30),
            }
            .is_retryable()
        );
    }
}
