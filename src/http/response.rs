//! Acceptance outcomes and their HTTP mapping.
//!
//! # Design Decisions
//! - Duplicates answer 200 so a retrying sender stops, without re-delivering
//! - Replay rejections are client errors and will not be retried by a sender
//! - A gone consumer answers 503, which senders treat as retriable

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::ReplayError;

/// Result of running an inbound envelope through the acceptance pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Acceptance {
    /// New envelope, handed to the consumer.
    Accepted,
    /// Already accepted earlier under the same id.
    Duplicate,
    Rejected(ReplayError),
    /// The consumer has stopped receiving.
    Unavailable,
}

impl Acceptance {
    /// Whether the sender should consider the envelope delivered.
    pub fn acknowledges(&self) -> bool {
        matches!(self, Acceptance::Accepted | Acceptance::Duplicate)
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Acceptance::Accepted => StatusCode::ACCEPTED,
            Acceptance::Duplicate => StatusCode::OK,
            Acceptance::Rejected(ReplayError::InvalidTimestamp { .. }) => StatusCode::BAD_REQUEST,
            Acceptance::Rejected(ReplayError::InvalidNonce { .. }) => StatusCode::CONFLICT,
            Acceptance::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Label used in logs and metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            Acceptance::Accepted => "accepted",
            Acceptance::Duplicate => "duplicate",
            Acceptance::Rejected(_) => "rejected",
            Acceptance::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Serialize)]
struct AcceptanceBody {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl IntoResponse for Acceptance {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Acceptance::Rejected(err) => AcceptanceBody {
                status: self.outcome(),
                reason: Some(err.reason()),
                detail: Some(err.to_string()),
            },
            _ => AcceptanceBody {
                status: self.outcome(),
                reason: None,
                detail: None,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NonceIssue, TimestampIssue};

    #[test]
    fn test_status_mapping() {
        assert_eq!(Acceptance::Accepted.status_code(), StatusCode::ACCEPTED);
        assert_eq!(Acceptance::Duplicate.status_code(), StatusCode::OK);
        assert_eq!(Acceptance::Unavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let stale = Acceptance::Rejected(ReplayError::InvalidTimestamp {
            envelope_id: "m".into(),
            issue: TimestampIssue::Missing,
        });
        assert_eq!(stale.status_code(), StatusCode::BAD_REQUEST);
        assert!(!stale.acknowledges());

        let replayed = Acceptance::Rejected(ReplayError::InvalidNonce {
            envelope_id: "m".into(),
            nonce: Some("n".into()),
            issue: NonceIssue::Duplicate,
        });
        assert_eq!(replayed.status_code(), StatusCode::CONFLICT);
    }
}
