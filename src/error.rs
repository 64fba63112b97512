//! Error types for a2a-paygate.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, sending or gating paid calls.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed address, amount or missing field. Never sent over the network.
    #[error("validation error: {0}")]
    Validation(String),

    /// Signing key unavailable or signing failed.
    #[error("signing error: {0}")]
    Signing(String),

    /// Connection-level failure talking to a peer or upstream.
    #[error("network error: {0}")]
    Network(String),

    /// The outbound call exceeded its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-2xx response other than payment rejection.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Response status code.
        status: u16,
        /// Response body text.
        body: String,
    },

    /// The peer (or its verifier) declined the payment.
    #[error("payment rejected (HTTP {status}): {body}")]
    PaymentRejected {
        /// Response status code.
        status: u16,
        /// Response body text.
        body: String,
    },

    /// Admission denied by the sliding-window limiter.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Time until the oldest request in the window ages out.
        retry_after: Duration,
    },

    /// JSON-RPC node returned an error or an undecodable result.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Third-party HTTP API failed or returned an unexpected shape.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a caller may retry with a freshly built authorization.
    ///
    /// [`Error::RateLimited`] is retryable once `retry_after` has passed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether this is a payment rejection (top up funds or adjust amount).
    #[must_use]
    pub fn is_payment_rejected(&self) -> bool {
        matches!(self, Self::PaymentRejected { .. })
    }

    /// Classify a `reqwest` failure on a call bounded by `timeout`.
    pub(crate) fn from_reqwest(e: &reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            Self::Timeout(timeout)
        } else if let Some(status) = e.status() {
            Self::Http {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Network("reset".to_string()).is_retryable());
        assert!(Error::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(Error::Http {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!Error::Http {
            status: 404,
            body: String::new()
        }
        .is_retryable());
        assert!(!Error::PaymentRejected {
            status: 402,
            body: String::new()
        }
        .is_retryable());
        assert!(!Error::Signing("bad key".to_string()).is_retryable());
        assert!(Error::RateLimited {
            retry_after: Duration::from_secs(1)
        }
        .is_retryable());
    }

    #[test]
    fn test_payment_rejected_is_distinct() {
        let rejected = Error::PaymentRejected {
            status: 402,
            body: "insufficient".to_string(),
        };
        assert!(rejected.is_payment_rejected());
        assert!(!Error::Network("refused".to_string()).is_payment_rejected());
    }
}
