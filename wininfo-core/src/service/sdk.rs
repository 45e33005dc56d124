use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::devices::DeviceLoop;
use super::state::StateTracker;
use super::trigger::{CategoryWorker, DetectTrigger, TriggerHandle};
use crate::detect::DetectEngine;
use crate::store::ReactiveStore;
use crate::types::{CandidateSet, Category, EntityKey};
use crate::watch::{WatchEvent, WatchHandler, WatchOptions, WatchSubscriptionRegistry};

/// Drives Windows SDK detection: one engine pass per trigger, root and
/// per-SDK watches kept in step with the result, and device polling kicked
/// whenever a default SDK exists.
pub(crate) struct SdkWorker {
    pub(crate) engine: DetectEngine,
    pub(crate) store: Arc<ReactiveStore>,
    pub(crate) states: StateTracker,
    /// Watches on the configured detection roots.
    pub(crate) roots: Arc<WatchSubscriptionRegistry>,
    /// One watch per detected SDK, keyed like the candidate.
    pub(crate) entities: Arc<WatchSubscriptionRegistry>,
    pub(crate) trigger: TriggerHandle,
    pub(crate) devices: Option<Arc<DeviceLoop>>,
    pub(crate) shutdown: CancellationToken,
}

impl fmt::Debug for SdkWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkWorker")
            .field("engine", &self.engine)
            .field("roots", &self.roots)
            .field("entities", &self.entities)
            .field("devices", &self.devices.is_some())
            .finish()
    }
}

impl SdkWorker {
    fn change_handler(&self) -> WatchHandler {
        if self.engine.redetect() {
            self.trigger.watch_handler()
        } else {
            Arc::new(|event: WatchEvent| {
                trace!(path = %event.path.display(), "sdk change ignored; redetect disabled");
            })
        }
    }

    async fn sync_root_watches(&self) {
        let options = WatchOptions::debounced().with_depth(self.engine.options().depth);
        for root in &self.engine.options().directories {
            if let Err(err) = self
                .roots
                .ensure(
                    EntityKey::from_path(root),
                    vec![root.clone()],
                    self.change_handler(),
                    options,
                )
                .await
            {
                warn!(
                    root = %root.display(),
                    error = %err,
                    "sdk root watch not established; will retry next pass"
                );
            }
        }
    }

    async fn sync_entity_watches(&self, candidates: &CandidateSet) {
        let current: HashSet<EntityKey> = candidates.keys().cloned().collect();
        let released = self.entities.reconcile(&current).await;
        if !released.is_empty() {
            debug!(released = released.len(), "released watches for vanished SDKs");
        }

        for candidate in candidates.iter() {
            if let Err(err) = self
                .entities
                .ensure(
                    candidate.key.clone(),
                    vec![candidate.path.clone()],
                    self.change_handler(),
                    WatchOptions::debounced(),
                )
                .await
            {
                warn!(
                    sdk = %candidate.key,
                    error = %err,
                    "sdk watch not established; will retry next pass"
                );
            }
        }
    }
}

#[async_trait]
impl CategoryWorker for SdkWorker {
    fn category(&self) -> Category {
        Category::Sdk
    }

    async fn pass(&self, trigger: DetectTrigger) {
        if !self.states.begin(Category::Sdk) {
            return;
        }

        let candidates = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            candidates = self.engine.run() => candidates,
        };
        if self.shutdown.is_cancelled() {
            return;
        }

        match self.store.set(Category::Sdk, candidates.clone()) {
            Ok(changed) => info!(
                count = candidates.len(),
                default = ?candidates.default_candidate().map(|c| c.path.display().to_string()),
                changed,
                ?trigger,
                "sdk detection pass complete"
            ),
            Err(err) => warn!(error = %err, "sdk detection result not committed"),
        }

        if self.engine.watch() {
            self.sync_root_watches().await;
            self.sync_entity_watches(&candidates).await;
        }

        if let Some(devices) = &self.devices {
            devices.ensure_running().await;
        }

        self.states.finish(Category::Sdk);
    }
}
