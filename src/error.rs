//! Error types for delivery and replay protection.

use std::fmt;
use thiserror::Error;

/// Terminal errors surfaced by a send operation.
///
/// Intermediate retry failures are never surfaced; a caller sees exactly one of these
/// after the retry loop has given up (or was never allowed to start).
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The destination's circuit breaker rejected the request without a network attempt.
    #[error("circuit open for {destination} ({consecutive_failures} consecutive failures)")]
    CircuitOpen {
        destination: String,
        consecutive_failures: u32,
    },

    /// Retriable failures exhausted, a non-retriable status, or a connection failure.
    #[error("delivery to {destination} failed after {attempts} attempt(s): {cause}")]
    Connection {
        destination: String,
        attempts: u32,
        /// HTTP status of the last response, if one was received.
        status: Option<u16>,
        cause: String,
    },

    /// The last attempt timed out.
    #[error("delivery to {destination} timed out after {attempts} attempt(s)")]
    Timeout { destination: String, attempts: u32 },

    /// The caller's cancellation token fired while the send was in flight.
    #[error("delivery to {destination} cancelled")]
    Cancelled { destination: String },

    /// The transport has been closed.
    #[error("transport closed")]
    Closed,

    /// The envelope could not be encoded.
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DeliveryError {
    /// Destination the error refers to, when it has one.
    pub fn destination(&self) -> Option<&str> {
        match self {
            DeliveryError::CircuitOpen { destination, .. }
            | DeliveryError::Connection { destination, .. }
            | DeliveryError::Timeout { destination, .. }
            | DeliveryError::Cancelled { destination } => Some(destination),
            DeliveryError::Closed | DeliveryError::Encode(_) => None,
        }
    }

    /// HTTP status attached to a connection error.
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::Connection { status, .. } => *status,
            _ => None,
        }
    }
}

/// Result type for delivery operations.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Replay-protection rejections.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReplayError {
    #[error("invalid timestamp on envelope {envelope_id}: {issue}")]
    InvalidTimestamp {
        envelope_id: String,
        issue: TimestampIssue,
    },

    #[error("invalid nonce on envelope {envelope_id}: {issue}")]
    InvalidNonce {
        envelope_id: String,
        /// The offending nonce, when it was a string.
        nonce: Option<String>,
        issue: NonceIssue,
    },
}

impl ReplayError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ReplayError::InvalidTimestamp { issue, .. } => match issue {
                TimestampIssue::Missing => "timestamp_missing",
                TimestampIssue::TooOld { .. } => "timestamp_too_old",
                TimestampIssue::TooFarInFuture { .. } => "timestamp_in_future",
            },
            ReplayError::InvalidNonce { issue, .. } => match issue {
                NonceIssue::NotAString => "nonce_not_string",
                NonceIssue::Empty => "nonce_empty",
                NonceIssue::Duplicate => "nonce_duplicate",
            },
        }
    }
}

/// Why a timestamp was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum TimestampIssue {
    Missing,
    TooOld { age_secs: f64, max_age_secs: u64 },
    TooFarInFuture { offset_secs: f64, tolerance_secs: u64 },
}

impl fmt::Display for TimestampIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampIssue::Missing => write!(f, "timestamp missing"),
            TimestampIssue::TooOld { age_secs, max_age_secs } => {
                write!(f, "age {:.3}s exceeds maximum {}s", age_secs, max_age_secs)
            }
            TimestampIssue::TooFarInFuture { offset_secs, tolerance_secs } => write!(
                f,
                "{:.3}s in the future exceeds tolerance {}s",
                offset_secs, tolerance_secs
            ),
        }
    }
}

/// Why a nonce was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceIssue {
    NotAString,
    Empty,
    Duplicate,
}

impl fmt::Display for NonceIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NonceIssue::NotAString => write!(f, "nonce must be a string"),
            NonceIssue::Empty => write!(f, "nonce is empty"),
            NonceIssue::Duplicate => write!(f, "nonce already used"),
        }
    }
}
