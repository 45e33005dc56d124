use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::StateTracker;
use crate::detect::{DefaultPolicy, RememberedDefault};
use crate::error::Result;
use crate::store::ReactiveStore;
use crate::types::{Candidate, CandidateSet, Category};

/// Enumerates connected devices using tooling from an installed SDK.
#[async_trait]
pub trait DeviceProbe: Send + Sync {
    async fn devices(&self, sdk: &Candidate) -> Result<Vec<Candidate>>;
}

/// Periodic device rescans that only run while the SDK store holds a
/// default SDK.
///
/// Each iteration re-reads the prerequisite from the store; when it is gone
/// the loop clears its own slot and exits. A later SDK pass restarts it
/// through [`DeviceLoop::ensure_running`].
pub(crate) struct DeviceLoop {
    probe: Arc<dyn DeviceProbe>,
    store: Arc<ReactiveStore>,
    states: StateTracker,
    interval: Duration,
    shutdown: CancellationToken,
    remembered: Mutex<Option<RememberedDefault>>,
    running: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for DeviceLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("DeviceLoop");
        debug.field("interval", &self.interval);
        match self.running.try_lock() {
            Ok(guard) => debug.field("running", &guard.is_some()),
            Err(_) => debug.field("running", &"<locked>"),
        };
        debug.finish()
    }
}

fn prerequisite(store: &ReactiveStore) -> Option<Candidate> {
    store.sdk().default_candidate().cloned()
}

impl DeviceLoop {
    pub(crate) fn new(
        probe: Arc<dyn DeviceProbe>,
        store: Arc<ReactiveStore>,
        states: StateTracker,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            probe,
            store,
            states,
            interval,
            shutdown,
            remembered: Mutex::new(None),
            running: Mutex::new(None),
        }
    }

    /// Start polling if the prerequisite is present and no loop is active.
    /// Returns whether a loop was started.
    pub(crate) async fn ensure_running(self: &Arc<Self>) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        let mut running = self.running.lock().await;
        if running.is_some() {
            return false;
        }
        if prerequisite(&self.store).is_none() {
            debug!("no default SDK; device polling not started");
            return false;
        }

        info!(interval = ?self.interval, "device polling started");
        *running = Some(tokio::spawn(Arc::clone(self).poll()));
        true
    }

    pub(crate) async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Wait for the loop to observe shutdown, aborting it if it does not.
    pub(crate) async fn stop(&self, grace: Duration) {
        let handle = self.running.lock().await.take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if timeout(grace, handle).await.is_err() {
                warn!("device loop did not stop in time; aborting");
                abort.abort();
            }
        }
    }

    async fn poll(self: Arc<Self>) {
        loop {
            let Some(sdk) = prerequisite(&self.store) else {
                let mut running = self.running.lock().await;
                // An SDK pass may have committed between the read above and
                // taking the lock; it saw `running` occupied and left it to us.
                if prerequisite(&self.store).is_some() {
                    continue;
                }
                running.take();
                info!("default SDK gone; device polling paused");
                return;
            };

            if !self.pass(&sdk).await {
                return;
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = sleep(self.interval) => {}
            }
        }
    }

    /// One device scan. Returns false once the service is shutting down.
    async fn pass(&self, sdk: &Candidate) -> bool {
        if !self.states.begin(Category::Devices) {
            return false;
        }

        let scanned = tokio::select! {
            _ = self.shutdown.cancelled() => return false,
            scanned = self.probe.devices(sdk) => scanned,
        };

        match scanned {
            Ok(mut devices) => {
                let policy = DefaultPolicy::StickyKey;
                let mut remembered = self.remembered.lock().await;
                if let Some(index) = policy.select(&mut devices, remembered.as_ref()) {
                    *remembered = Some(policy.remember(&devices[index]));
                }
                drop(remembered);

                let count = devices.len();
                match self.store.set(Category::Devices, CandidateSet::new(devices)) {
                    Ok(changed) => debug!(count, changed, "device scan committed"),
                    Err(err) => warn!(error = %err, "device scan not committed"),
                }
            }
            Err(err) => {
                warn!(
                    sdk = %sdk.path.display(),
                    error = %err,
                    "device scan failed; keeping previous devices"
                );
            }
        }

        self.states.finish(Category::Devices)
    }
}
