//! SIGINT/SIGTERM handling.
//!
//! A signal cancels the session token; the transfer pump observes it before
//! each queue item, so the item in flight always completes.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token to hand to a deployment session.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel without waiting for a signal.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Wait for SIGINT or SIGTERM, then cancel the token.
    pub async fn wait_for_signal(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        #[cfg(unix)]
        let terminate = async move {
            terminate.recv().await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            res = signal::ctrl_c() => {
                res?;
                info!("Received SIGINT (Ctrl+C), stopping after the current operation...");
            }
            _ = terminate => {
                info!("Received SIGTERM, stopping after the current operation...");
            }
            _ = self.token.cancelled() => return Ok(()),
        }

        self.token.cancel();
        Ok(())
    }

    /// Spawn the signal listener in the background.
    pub fn listen(self) -> CancellationToken {
        let token = self.token();
        tokio::spawn(async move {
            if let Err(e) = self.wait_for_signal().await {
                warn!("Failed to install signal handlers: {}", e);
            }
        });
        token
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_cancels_token() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();

        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });

        coordinator.trigger();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_returns_once_cancelled() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger();
        coordinator.wait_for_signal().await.unwrap();
        assert!(coordinator.token().is_cancelled());
    }
}
