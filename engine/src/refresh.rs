//! Background view refresh.
//!
//! While a view is active it re-runs its query set on a fixed interval.
//! The task is tied to the returned handle: dropping it aborts the loop,
//! so a torn-down view can never leave an orphaned timer re-querying the
//! ledger forever.
//!
//! Only the *timer* is cancellable. A mutation that has already been
//! submitted is never cancelled - cancellation in this engine applies to
//! superseded quotes and pending status resets, nothing funds-affecting.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default refresh cadence for active views.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// A periodically re-run refresh closure. Aborts on drop.
#[derive(Debug)]
pub struct RefreshTask {
    handle: JoinHandle<()>,
}

impl RefreshTask {
    /// Run `refresh` immediately, then every `interval` until dropped.
    #[must_use]
    pub fn spawn<F, Fut>(interval: Duration, mut refresh: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                refresh().await;
            }
        });
        Self { handle }
    }

    /// Whether the loop has stopped (only after an abort).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
