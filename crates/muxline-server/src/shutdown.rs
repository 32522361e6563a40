//! Graceful shutdown: one `CancellationToken` to signal, one `TaskTracker`
//! to drain link tasks.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;
use tracing::{info, warn};

/// Default time to wait for link tasks before giving up.
pub(crate) const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates shutdown across the listener and every link task.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wrap `future` so [`drain`](Self::drain) waits for it.
    pub fn track<F: Future>(&self, future: F) -> TrackedFuture<F> {
        self.tracker.track_future(future)
    }

    /// Tasks still running.
    pub fn tracked_count(&self) -> usize {
        self.tracker.len()
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown and wait up to `timeout` for tracked tasks.
    ///
    /// Returns `true` when every task finished in time.
    pub async fn drain(&self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.shutdown();
        let _ = self.tracker.close();
        info!(
            task_count = self.tracker.len(),
            timeout_secs = timeout.as_secs(),
            "draining link tasks"
        );

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!(remaining = self.tracker.len(), "drain timed out after {timeout:?}");
            false
        } else {
            true
        }
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

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
        assert_eq!(coord.tracked_count(), 0);
    }

    #[test]
    fn token_propagation() {
        let coord = ShutdownCoordinator::new();
        let t1 = coord.token();
        let t2 = coord.token();
        coord.shutdown();
        coord.shutdown();
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_tracked_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let _handle = tokio::spawn(coord.track(async move {
            token.cancelled().await;
        }));
        assert_eq!(coord.tracked_count(), 1);

        assert!(coord.drain(None).await);
        assert!(coord.is_shutting_down());
        assert_eq!(coord.tracked_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_times_out_on_stuck_task() {
        let coord = ShutdownCoordinator::new();
        let _handle = tokio::spawn(coord.track(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        }));

        assert!(!coord.drain(Some(Duration::from_millis(100))).await);
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn drain_with_nothing_tracked_is_immediate() {
        let coord = ShutdownCoordinator::new();
        assert!(coord.drain(Some(Duration::from_millis(10))).await);
    }
}
