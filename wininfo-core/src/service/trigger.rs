use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::types::Category;
use crate::watch::{WatchEvent, WatchHandler};

/// Why a detection pass was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectTrigger {
    Activation,
    Manual,
    Timer,
    Watch(WatchEvent),
    /// Something changed under an install root.
    InstallRoot(PathBuf),
}

/// Sending half of a category's pass queue.
///
/// The queue holds a single pending request. Requests made while one is
/// already pending collapse into it, so a burst during a running pass yields
/// exactly one follow-up pass.
#[derive(Debug, Clone)]
pub(crate) struct TriggerHandle {
    category: Category,
    tx: mpsc::Sender<DetectTrigger>,
}

impl TriggerHandle {
    pub(crate) fn channel(category: Category) -> (Self, mpsc::Receiver<DetectTrigger>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { category, tx }, rx)
    }

    /// Queue a pass. Returns false once the worker has gone away.
    pub(crate) fn request(&self, trigger: DetectTrigger) -> bool {
        match self.tx.try_send(trigger) {
            Ok(()) => true,
            Err(TrySendError::Full(trigger)) => {
                trace!(category = %self.category, ?trigger, "pass already pending; coalesced");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Watch handler that turns every delivered event into a pass request.
    pub(crate) fn watch_handler(&self) -> WatchHandler {
        let handle = self.clone();
        Arc::new(move |event: WatchEvent| {
            handle.request(DetectTrigger::Watch(event));
        })
    }

    /// Request a pass every `period` until `shutdown` fires.
    pub(crate) fn spawn_timer(
        &self,
        period: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; activation already ran a pass.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if !handle.request(DetectTrigger::Timer) {
                            break;
                        }
                    }
                }
            }
            debug!(category = %handle.category, "poll timer stopped");
        })
    }
}

/// One category's detection routine, driven by a single worker task so its
/// passes never overlap.
#[async_trait]
pub(crate) trait CategoryWorker: Send + Sync {
    fn category(&self) -> Category;

    async fn pass(&self, trigger: DetectTrigger);
}

pub(crate) fn spawn_worker(
    worker: Arc<dyn CategoryWorker>,
    mut rx: mpsc::Receiver<DetectTrigger>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let category = worker.category();
        loop {
            let trigger = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(trigger) => trigger,
                    None => break,
                },
            };
            debug!(%category, ?trigger, "detection pass requested");
            worker.pass(trigger).await;
        }
        info!(%category, "detection worker shutting down");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_requests_coalesce() {
        let (handle, mut rx) = TriggerHandle::channel(Category::Sdk);
        assert!(handle.request(DetectTrigger::Manual));
        assert!(handle.request(DetectTrigger::Timer));
        assert!(handle.request(DetectTrigger::Timer));

        assert_eq!(rx.recv().await, Some(DetectTrigger::Manual));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_queue_reports_failure() {
        let (handle, rx) = TriggerHandle::channel(Category::Ide);
        drop(rx);
        assert!(!handle.request(DetectTrigger::Manual));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_requests_after_each_period() {
        let (handle, mut rx) = TriggerHandle::channel(Category::Sdk);
        let shutdown = CancellationToken::new();
        let timer = handle.spawn_timer(Duration::from_secs(5), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.try_recv().ok(), Some(DetectTrigger::Timer));

        shutdown.cancel();
        timer.await.unwrap();
    }
}
