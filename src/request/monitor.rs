//! Progress Monitor
//!
//! Cooperative cancellation and progress reporting handle that is threaded
//! through every potentially blocking call. Cancellation only ever means
//! "stop waiting"; a remote call that is already in flight is not aborted.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::debug;

use super::error::RequestError;

#[derive(Debug)]
struct MonitorInner {
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    task: RwLock<String>,
}

/// Cancellation/progress handle shared between a caller and its operations.
///
/// Cloning is cheap; all clones observe the same cancellation flag.
#[derive(Debug, Clone)]
pub struct ProgressMonitor {
    inner: Arc<MonitorInner>,
}

impl ProgressMonitor {
    pub fn new() -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            inner: Arc::new(MonitorInner {
                cancel_tx,
                cancel_rx,
                task: RwLock::new(String::new()),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancel_rx.borrow()
    }

    pub fn cancel(&self) {
        debug!("Cancellation requested for task '{}'", self.inner.task.read());
        let _ = self.inner.cancel_tx.send(true);
    }

    /// Fail with [`RequestError::Cancelled`] if cancellation was requested
    pub fn check(&self) -> Result<(), RequestError> {
        if self.is_cancelled() {
            Err(RequestError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Get a receiver for waiting on cancellation
    pub fn subscribe_cancellation(&self) -> watch::Receiver<bool> {
        self.inner.cancel_rx.clone()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        let mut rx = self.subscribe_cancellation();
        // The sender lives in `inner`, so `changed()` only errors if every
        // clone of this monitor is gone, which cannot happen while `self` is.
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Set the human readable name of the current step
    pub fn set_task(&self, name: impl Into<String>) {
        let name = name.into();
        debug!("Task: {}", name);
        *self.inner.task.write() = name;
    }

    pub fn task(&self) -> String {
        self.inner.task.read().clone()
    }

    /// Sleep for `delay` unless cancellation arrives first
    pub async fn sleep(&self, delay: Duration) -> Result<(), RequestError> {
        self.check()?;
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = self.cancelled() => Err(RequestError::Cancelled),
        }
    }
}

impl Default for ProgressMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let monitor = ProgressMonitor::new();
        let clone = monitor.clone();
        assert!(!clone.is_cancelled());
        assert!(monitor.check().is_ok());

        monitor.cancel();
        assert!(clone.is_cancelled());
        assert!(matches!(clone.check(), Err(RequestError::Cancelled)));
    }

    #[test]
    fn test_task_name() {
        let monitor = ProgressMonitor::new();
        monitor.set_task("Fetching applications");
        assert_eq!(monitor.task(), "Fetching applications");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes() {
        let monitor = ProgressMonitor::new();
        let start = tokio::time::Instant::now();
        monitor.sleep(Duration::from_secs(2)).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_cancel() {
        let monitor = ProgressMonitor::new();
        let canceller = monitor.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let start = tokio::time::Instant::now();
        let result = monitor.sleep(Duration::from_secs(60)).await;
        assert!(matches!(result, Err(RequestError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(60));
    }
}
