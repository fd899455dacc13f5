//! Shutdown coordination.

use tokio_util::sync::CancellationToken;

/// Coordinator for graceful shutdown.
///
/// Long-running tasks take a child token; triggering cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when shutdown is triggered. Cancelling it does not affect others.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutdown triggered");
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until shutdown is triggered.
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }
}
