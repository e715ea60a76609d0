//! Emergency stop token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct StopState {
    stopped: AtomicBool,
    notify: Notify,
}

/// Cooperative stop signal shared between a run and whoever may abort it.
///
/// Clones share state. A token stays stopped once triggered; use a fresh
/// token per run.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    state: Arc<StopState>,
}

impl StopToken {
    /// Create a token that is not stopped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the stop and wake every waiter.
    pub fn stop(&self) {
        self.state.stopped.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    /// Whether the stop was triggered.
    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }

    /// Resolve once the stop is triggered.
    pub async fn stopped(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent stop is not missed.
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_starts_running() {
        let token = StopToken::new();
        assert!(!token.is_stopped());
        token.clone().stop();
        assert!(token.is_stopped());
    }

    #[tokio::test]
    async fn test_stopped_returns_when_already_stopped() {
        let token = StopToken::new();
        token.stop();
        token.stopped().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_wakes_waiter() {
        let token = StopToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.stopped().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.stop();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
