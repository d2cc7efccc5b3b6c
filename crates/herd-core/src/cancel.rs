//! Run-scoped cancellation

use std::sync::Arc;

use tokio::sync::watch;

/// Cancellation signal shared by the collector and every host task
///
/// Cancelling stops hosts that have not started and ends collection; work already talking to
/// a host is left to finish on its own.
#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signal cancellation to every clone
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancelled; never resolves otherwise
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let cancel = Cancellation::new();
        let waiter = cancel.clone();

        let handle = tokio::spawn(async move { waiter.cancelled().await });
        assert!(!cancel.is_cancelled());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_not_cancelled_stays_pending() {
        let cancel = Cancellation::new();
        let result = tokio::time::timeout(Duration::from_millis(50), cancel.cancelled()).await;
        assert!(result.is_err());
    }
}
