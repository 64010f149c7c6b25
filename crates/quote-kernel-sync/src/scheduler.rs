use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Fires a job once immediately and then on a fixed interval.
///
/// Every firing runs as its own task, so a slow job never delays the next tick and
/// two firings may overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncScheduler {
    interval: Duration,
}

impl Default for SyncScheduler {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS))
    }
}

impl SyncScheduler {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval: interval.max(MIN_INTERVAL) }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the schedule on the current tokio runtime.
    pub fn spawn<F, Fut>(self, job: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                tracing::debug!(interval_secs = self.interval.as_secs(), "sync tick");
                tokio::spawn(job());
            }
        })
    }
}
