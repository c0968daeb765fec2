//! Cooperative cancellation for long-running operations
//!
//! Downloads and manifest refreshes can take a long time on slow links; a
//! [`CancelToken`] lets callers abort them between I/O steps. Clones share
//! one underlying channel, so any clone can cancel and every clone observes
//! it. Cancellation is cooperative: operations check the token at their
//! suspension points and never interrupt an in-progress atomic rename.

use tokio::sync::watch;

/// Clonable cancellation handle
///
/// # Example
///
/// ```
/// use modelyard::util::CancelToken;
///
/// let token = CancelToken::new();
/// let worker_token = token.clone();
/// assert!(!worker_token.is_cancelled());
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Creates a token in the not-cancelled state
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    /// Requests cancellation; all clones observe the change
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is requested; pends forever otherwise
    ///
    /// Intended for `tokio::select!` alongside the I/O being guarded.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in self, so wait_for can only end on a real cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_token_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_visible_to_clones() {
        let token = CancelToken::new();
        let clone = token.clone();

        clone.cancel();

        assert!(token.is_cancelled());
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let token = CancelToken::new();
        let waiter = token.clone();

        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cancelled() should resolve after cancel()")
            .expect("task should not panic");
    }

    #[tokio::test]
    async fn test_cancelled_future_pends_without_cancel() {
        let token = CancelToken::new();
        let result = tokio::time::timeout(Duration::from_millis(50), token.cancelled()).await;
        assert!(result.is_err(), "cancelled() must pend until cancel()");
    }
}
