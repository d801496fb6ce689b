//! Error taxonomy for the resilience layer
//!
//! Callers distinguish three failure classes: a rejection because the
//! circuit is open, a non-retryable downstream error surfaced unmodified,
//! and an aggregate error after the retry budget is exhausted.

use thiserror::Error;

/// AWS-style throttling error names that always merit a retry.
const THROTTLING_ERROR_NAMES: &[&str] = &[
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "ServiceUnavailable",
];

/// Error names that are never retryable, regardless of status code.
const NON_RETRYABLE_ERROR_NAMES: &[&str] = &[
    "ValidationException",
    "InvalidParameterException",
    "AccessDeniedException",
];

/// Error returned by the resilience layer around a protected call.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + 'static,
{
    /// The circuit is open; the downstream call was not attempted.
    #[error("circuit breaker is open for service: {service}")]
    CircuitOpen {
        /// Service key of the rejected call
        service: String,
    },

    /// Every allowed attempt failed with a retryable error.
    #[error("all {attempts} retry attempts failed")]
    RetryExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Every error encountered, in attempt order
        errors: Vec<E>,
    },

    /// The downstream error, surfaced unmodified after a retry veto.
    #[error("{0}")]
    Inner(#[source] E),
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + 'static,
{
    /// Whether this is a circuit-open rejection (the downstream was never called).
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Attempt count, present only on the exhaustion variant.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetryExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// The most recent downstream error, if any attempt was made.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::CircuitOpen { .. } => None,
            Self::RetryExhausted { errors, .. } => errors.last(),
            Self::Inner(error) => Some(error),
        }
    }
}

/// Classification of downstream errors for the default retry decision.
///
/// Implementors describe the error; [`RetryableError::is_retryable`]
/// provides the decision and normally stays as the default.
pub trait RetryableError {
    /// Network-level failure: connection refused/reset, timeout, failed
    /// name resolution.
    fn is_network_error(&self) -> bool {
        false
    }

    /// HTTP status code carried by the error, when there is one.
    fn status_code(&self) -> Option<u16> {
        None
    }

    /// Vendor error name (e.g. `ThrottlingException`), when there is one.
    fn error_name(&self) -> Option<&str> {
        None
    }

    /// Check if the error is retryable.
    fn is_retryable(&self) -> bool {
        // Network errors are always transient
        if self.is_network_error() {
            return true;
        }

        // Too Many Requests, Bad Gateway, Service Unavailable, Gateway Timeout
        if let Some(status) = self.status_code() {
            if matches!(status, 429 | 502 | 503 | 504) {
                return true;
            }
        }

        if let Some(name) = self.error_name() {
            if THROTTLING_ERROR_NAMES.contains(&name) {
                return true;
            }
        }

        // Client errors other than 429 are the caller's fault
        if let Some(status) = self.status_code() {
            if (400..500).contains(&status) && status != 429 {
                return false;
            }
        }

        if let Some(name) = self.error_name() {
            if NON_RETRYABLE_ERROR_NAMES.contains(&name) {
                return false;
            }
        }

        // Default: retry on server errors
        matches!(self.status_code(), Some(status) if status >= 500)
    }
}

impl RetryableError for std::io::Error {
    fn is_network_error(&self) -> bool {
        use std::io::ErrorKind;

        matches!(
            self.kind(),
            ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::AddrInUse
                | ErrorKind::AddrNotAvailable
                | ErrorKind::TimedOut
                | ErrorKind::Interrupted
                | ErrorKind::WouldBlock
        )
    }
}
