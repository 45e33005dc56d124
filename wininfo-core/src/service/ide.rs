use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::CandidateConstructor;
use super::state::StateTracker;
use super::trigger::{CategoryWorker, DetectTrigger, TriggerHandle};
use crate::detect::locator::candidates_from_output;
use crate::detect::{DefaultPolicy, ExternalLocator, RememberedDefault};
use crate::error::Result;
use crate::store::ReactiveStore;
use crate::types::{Candidate, Category, EntityKey};
use crate::watch::{WatchEvent, WatchHandler, WatchOptions, WatchSubscriptionRegistry};

/// Drives Visual Studio discovery through the external locator.
///
/// Besides one watch per discovered instance, the worker watches every
/// configured install root (armed on the nearest existing ancestor while
/// the root is absent), every release folder inside an existing root, and
/// whatever paths the locator itself reports as relevant.
pub(crate) struct IdeWorker {
    pub(crate) locator: Arc<dyn ExternalLocator>,
    pub(crate) constructor: CandidateConstructor,
    pub(crate) install_roots: Vec<PathBuf>,
    pub(crate) watch: bool,
    pub(crate) store: Arc<ReactiveStore>,
    pub(crate) states: StateTracker,
    /// Install roots and locator paths.
    pub(crate) roots: Arc<WatchSubscriptionRegistry>,
    /// Release folders under existing install roots.
    pub(crate) releases: Arc<WatchSubscriptionRegistry>,
    /// One watch per instance id.
    pub(crate) entities: Arc<WatchSubscriptionRegistry>,
    pub(crate) trigger: TriggerHandle,
    pub(crate) shutdown: CancellationToken,
    pub(crate) remembered: Mutex<Option<RememberedDefault>>,
    /// Whether each root was present when its watch was armed.
    pub(crate) armed_roots: Mutex<HashMap<PathBuf, bool>>,
}

impl fmt::Debug for IdeWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdeWorker")
            .field("install_roots", &self.install_roots)
            .field("watch", &self.watch)
            .field("roots", &self.roots)
            .field("releases", &self.releases)
            .field("entities", &self.entities)
            .finish_non_exhaustive()
    }
}

/// Release folders are named after the product year (`2019`, `2022`).
fn is_release_dir(name: &str) -> bool {
    !name.is_empty() && name.parse::<u32>().is_ok()
}

async fn release_dirs(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(err) => {
            debug!(root = %root.display(), error = %err, "install root not readable");
            return found;
        }
    };
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let is_dir = entry
                    .file_type()
                    .await
                    .map(|kind| kind.is_dir())
                    .unwrap_or(false);
                if is_dir && entry.file_name().to_str().is_some_and(is_release_dir) {
                    found.push(entry.path());
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(root = %root.display(), error = %err, "install root listing interrupted");
                break;
            }
        }
    }
    found.sort();
    found
}

impl IdeWorker {
    fn install_root_handler(&self) -> WatchHandler {
        let trigger = self.trigger.clone();
        Arc::new(move |event: WatchEvent| {
            trigger.request(DetectTrigger::InstallRoot(event.path));
        })
    }

    /// Query the locator and build the instance map, deduplicated by
    /// instance id (first record wins) with a sticky default.
    async fn detect(&self) -> Result<BTreeMap<EntityKey, Candidate>> {
        let output = self.locator.detect().await?;
        let constructor = Arc::clone(&self.constructor);
        let records = candidates_from_output(&output, |raw| constructor(raw))?;

        let mut seen = HashSet::new();
        let mut instances: Vec<Candidate> = Vec::with_capacity(records.len());
        for candidate in records {
            if seen.insert(candidate.key.clone()) {
                instances.push(candidate);
            } else {
                debug!(instance = %candidate.key, "duplicate locator record ignored");
            }
        }

        let policy = DefaultPolicy::StickyKey;
        let mut remembered = self.remembered.lock().await;
        if let Some(index) = policy.select(&mut instances, remembered.as_ref()) {
            *remembered = Some(policy.remember(&instances[index]));
        }

        Ok(instances
            .into_iter()
            .map(|candidate| (candidate.key.clone(), candidate))
            .collect())
    }

    async fn sync_entity_watches(&self, instances: &BTreeMap<EntityKey, Candidate>) {
        let current: HashSet<EntityKey> = instances.keys().cloned().collect();
        let released = self.entities.reconcile(&current).await;
        if !released.is_empty() {
            debug!(released = released.len(), "released watches for removed instances");
        }

        for (key, candidate) in instances {
            if let Err(err) = self
                .entities
                .ensure(
                    key.clone(),
                    vec![candidate.path.clone()],
                    self.trigger.watch_handler(),
                    WatchOptions::debounced(),
                )
                .await
            {
                warn!(
                    instance = %key,
                    error = %err,
                    "instance watch not established; will retry next pass"
                );
            }
        }
    }

    /// Arm root watches to match what exists on disk now, and keep one
    /// watch per release folder under every existing root.
    async fn sync_install_roots(&self) {
        let mut armed = self.armed_roots.lock().await;
        let mut live_releases = HashSet::new();

        for root in &self.install_roots {
            let key = EntityKey::from_path(root);
            let present = tokio::fs::metadata(root)
                .await
                .map(|meta| meta.is_dir())
                .unwrap_or(false);

            if let Some(&was_present) = armed.get(root)
                && was_present != present
            {
                // Root appeared or vanished since it was armed: the old watch
                // points at the wrong directory.
                match self.roots.release(&key).await {
                    Ok(_) => {
                        armed.remove(root);
                    }
                    Err(err) => {
                        warn!(
                            root = %root.display(),
                            error = %err,
                            "stale install root watch not released"
                        );
                        continue;
                    }
                }
            }

            let options = if present {
                WatchOptions::debounced().with_depth(1)
            } else {
                WatchOptions::debounced()
            };
            match self
                .roots
                .ensure(
                    key,
                    vec![root.clone()],
                    self.install_root_handler(),
                    options,
                )
                .await
            {
                Ok(created) => {
                    if created {
                        debug!(root = %root.display(), present, "install root watch armed");
                    }
                    armed.insert(root.clone(), present);
                }
                Err(err) => {
                    warn!(
                        root = %root.display(),
                        error = %err,
                        "install root watch not established; will retry next pass"
                    );
                }
            }

            if !present {
                continue;
            }
            for release in release_dirs(root).await {
                let key = EntityKey::from_path(&release);
                live_releases.insert(key.clone());
                if let Err(err) = self
                    .releases
                    .ensure(
                        key,
                        vec![release.clone()],
                        self.trigger.watch_handler(),
                        WatchOptions::debounced().with_depth(1),
                    )
                    .await
                {
                    warn!(
                        release = %release.display(),
                        error = %err,
                        "release folder watch not established"
                    );
                }
            }
        }
        drop(armed);

        self.releases.reconcile(&live_releases).await;

        for path in self.locator.watch_paths() {
            if let Err(err) = self
                .roots
                .ensure(
                    EntityKey::from_path(&path),
                    vec![path.clone()],
                    self.trigger.watch_handler(),
                    WatchOptions::debounced(),
                )
                .await
            {
                warn!(path = %path.display(), error = %err, "locator watch not established");
            }
        }
    }
}

#[async_trait]
impl CategoryWorker for IdeWorker {
    fn category(&self) -> Category {
        Category::Ide
    }

    async fn pass(&self, trigger: DetectTrigger) {
        if !self.states.begin(Category::Ide) {
            return;
        }

        let detected = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            detected = self.detect() => detected,
        };
        if self.shutdown.is_cancelled() {
            return;
        }

        match detected {
            Ok(instances) => {
                match self.store.set(Category::Ide, instances.clone()) {
                    Ok(changed) => info!(
                        count = instances.len(),
                        changed,
                        ?trigger,
                        "visual studio detection pass complete"
                    ),
                    Err(err) => warn!(error = %err, "visual studio result not committed"),
                }
                if self.watch {
                    self.sync_entity_watches(&instances).await;
                }
            }
            Err(err) => {
                warn!(
                    error = %err,
                    ?trigger,
                    "visual studio detection failed; keeping previous instances"
                );
            }
        }

        if self.watch {
            self.sync_install_roots().await;
        }

        self.states.finish(Category::Ide);
    }
}
