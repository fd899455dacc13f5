//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap a single transport attempt with an optional deadline
//! - Report an elapsed deadline as a distinct failure kind
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the timed-out future is dropped (cancelled)
//! - Timeout failures stay distinct from connection failures so callers can treat them differently

use std::future::Future;
use std::time::Duration;

use crate::transport::http::TransportFailure;

/// Run `attempt`, converting an elapsed deadline into [`TransportFailure::Timeout`].
pub async fn with_deadline<T, F>(deadline: Option<Duration>, attempt: F) -> Result<T, TransportFailure>
where
    F: Future<Output = Result<T, TransportFailure>>,
{
    match deadline {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => Err(TransportFailure::Timeout),
        },
        None => attempt.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let result: Result<(), _> = with_deadline(Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(TransportFailure::Timeout)));
    }

    #[tokio::test]
    async fn test_no_deadline_passes_through() {
        let result = with_deadline(None, async { Ok::<_, TransportFailure>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
