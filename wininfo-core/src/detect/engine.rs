use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::selection::{DefaultPolicy, RememberedDefault};
use super::walk::walk_root;
use super::{ProbeDirectory, RegistryProbe};
use crate::types::CandidateSet;

/// Construction-time settings for a [`DetectEngine`].
#[derive(Clone)]
pub struct DetectOptions {
    /// Candidate roots probed in order.
    pub directories: Vec<PathBuf>,
    /// Extra roots enumerated from the OS registry on every pass.
    pub registry: Option<Arc<dyn RegistryProbe>>,
    pub probe: Arc<dyn ProbeDirectory>,
    /// When false, a pass stops at the first recognised candidate.
    pub multiple: bool,
    /// How many directory levels below a root may be probed.
    pub depth: usize,
    /// Re-run whenever a watched root changes.
    pub redetect: bool,
    /// Establish filesystem watches on `directories` at all.
    pub watch: bool,
    pub default_policy: DefaultPolicy,
    /// Upper bound for walking a single root. `None` waits forever.
    pub probe_timeout: Option<Duration>,
}

impl DetectOptions {
    pub fn new(probe: Arc<dyn ProbeDirectory>) -> Self {
        Self {
            directories: Vec::new(),
            registry: None,
            probe,
            multiple: true,
            depth: 0,
            redetect: false,
            watch: false,
            default_policy: DefaultPolicy::StickyPath,
            probe_timeout: None,
        }
    }
}

impl fmt::Debug for DetectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectOptions")
            .field("directories", &self.directories)
            .field("registry", &self.registry.is_some())
            .field("multiple", &self.multiple)
            .field("depth", &self.depth)
            .field("redetect", &self.redetect)
            .field("watch", &self.watch)
            .field("default_policy", &self.default_policy)
            .field("probe_timeout", &self.probe_timeout)
            .finish()
    }
}

/// Runs detection passes: directory/registry probe fan-out followed by
/// default-selection. Passes for one engine must not overlap; the info
/// service guarantees this by driving each engine from a single worker.
pub struct DetectEngine {
    options: DetectOptions,
    remembered: Mutex<Option<RememberedDefault>>,
}

impl fmt::Debug for DetectEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("DetectEngine");
        debug.field("options", &self.options);
        match self.remembered.try_lock() {
            Ok(guard) => debug.field("remembered", &*guard),
            Err(_) => debug.field("remembered", &"<locked>"),
        };
        debug.finish()
    }
}

impl DetectEngine {
    pub fn new(options: DetectOptions) -> Self {
        Self {
            options,
            remembered: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &DetectOptions {
        &self.options
    }

    pub fn redetect(&self) -> bool {
        self.options.redetect
    }

    pub fn watch(&self) -> bool {
        self.options.watch
    }

    pub async fn remembered_default(&self) -> Option<RememberedDefault> {
        self.remembered.lock().await.clone()
    }

    /// Seed the sticky default, e.g. from a previous process run.
    pub async fn remember_default(&self, remembered: Option<RememberedDefault>) {
        *self.remembered.lock().await = remembered;
    }

    /// Execute one detection pass. Never fails: probe and registry errors
    /// degrade to fewer candidates.
    pub async fn run(&self) -> CandidateSet {
        let roots = self.probe_paths().await;
        let depth = self.options.depth;
        let multiple = self.options.multiple;

        let walks = roots.iter().cloned().map(|root| {
            let probe = Arc::clone(&self.options.probe);
            let probe_timeout = self.options.probe_timeout;
            async move {
                let task_root = root.clone();
                let handle = spawn_blocking(move || {
                    walk_root(&task_root, depth, multiple, probe.as_ref())
                });

                let joined = match probe_timeout {
                    Some(limit) => match timeout(limit, handle).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            warn!(
                                path = %root.display(),
                                ?limit,
                                "probe timed out; treating as absent"
                            );
                            return Vec::new();
                        }
                    },
                    None => handle.await,
                };

                joined.unwrap_or_else(|err| {
                    warn!(path = %root.display(), error = %err, "probe task failed");
                    Vec::new()
                })
            }
        });

        // join_all keeps root order, which is discovery order. A registry
        // root inside a walked directory is reported by both; first wins.
        let mut seen = HashSet::new();
        let mut results: Vec<_> = join_all(walks)
            .await
            .into_iter()
            .flatten()
            .filter(|candidate| seen.insert(candidate.key.clone()))
            .collect();

        if !multiple {
            results.truncate(1);
        }

        let mut set = CandidateSet::new(results);
        let mut remembered = self.remembered.lock().await;
        if let Some(idx) = self
            .options
            .default_policy
            .select(set.as_mut_slice(), remembered.as_ref())
        {
            *remembered = Some(self.options.default_policy.remember(&set.as_slice()[idx]));
        }

        debug!(roots = roots.len(), candidates = set.len(), "detection pass complete");
        set
    }

    /// `directories` followed by registry-derived roots, de-duplicated with the
    /// first occurrence kept.
    async fn probe_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.options.directories.clone();

        if let Some(registry) = &self.options.registry {
            match registry.paths().await {
                Ok(found) => paths.extend(found),
                Err(err) => {
                    warn!(error = %err, "registry enumeration failed; continuing without it");
                }
            }
        }

        let mut seen = HashSet::new();
        paths.retain(|path| seen.insert(path.clone()));
        paths
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{InfoError, Result};
    use crate::types::{Candidate, CandidateKind};

    fn marker_probe() -> Arc<dyn ProbeDirectory> {
        Arc::new(|path: &Path| -> Result<Option<Candidate>> {
            if path.join("sdk.marker").exists() {
                Ok(Some(Candidate::new(
                    CandidateKind::Sdk,
                    path,
                    serde_json::json!({
                        "version": path.file_name().map(|n| n.to_string_lossy().to_string())
                    }),
                )))
            } else {
                Ok(None)
            }
        })
    }

    fn make_sdk(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("sdk.marker"), b"").unwrap();
        dir
    }

    struct FixedRegistry(Vec<PathBuf>);

    #[async_trait]
    impl RegistryProbe for FixedRegistry {
        async fn paths(&self) -> Result<Vec<PathBuf>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenRegistry;

    #[async_trait]
    impl RegistryProbe for BrokenRegistry {
        async fn paths(&self) -> Result<Vec<PathBuf>> {
            Err(InfoError::RegistryAccess("access denied".into()))
        }
    }

    #[tokio::test]
    async fn sticky_default_survives_reordering() {
        let tmp = tempfile::tempdir().unwrap();
        let a = make_sdk(tmp.path(), "a");
        let b = make_sdk(tmp.path(), "b");

        let mut options = DetectOptions::new(marker_probe());
        options.directories = vec![a.clone(), b.clone()];
        let engine = DetectEngine::new(options);
        engine
            .remember_default(Some(RememberedDefault::Path(b.clone())))
            .await;

        let set = engine.run().await;
        assert_eq!(set.len(), 2);
        assert_eq!(set.default_candidate().map(|c| c.path.clone()), Some(b));
    }

    #[tokio::test]
    async fn registry_roots_are_merged_and_deduplicated() {
        let tmp = tempfile::tempdir().unwrap();
        let a = make_sdk(tmp.path(), "a");
        let b = make_sdk(tmp.path(), "b");

        let mut options = DetectOptions::new(marker_probe());
        options.directories = vec![a.clone()];
        options.registry = Some(Arc::new(FixedRegistry(vec![a.clone(), b.clone()])));
        let engine = DetectEngine::new(options);

        let set = engine.run().await;
        let paths: Vec<_> = set.iter().map(|c| c.path.clone()).collect();
        assert_eq!(paths, vec![a.clone(), b]);
        assert_eq!(set.default_candidate().map(|c| c.path.clone()), Some(a));
    }

    #[tokio::test]
    async fn registry_root_inside_walked_directory_is_reported_once() {
        let tmp = tempfile::tempdir().unwrap();
        let kit = make_sdk(tmp.path(), "10");

        let mut options = DetectOptions::new(marker_probe());
        options.directories = vec![tmp.path().to_path_buf()];
        options.depth = 1;
        options.registry = Some(Arc::new(FixedRegistry(vec![kit.clone()])));
        let engine = DetectEngine::new(options);

        let set = engine.run().await;
        let paths: Vec<_> = set.iter().map(|c| c.path.clone()).collect();
        assert_eq!(paths, vec![kit]);
        assert!(set.as_slice()[0].is_default);
    }

    #[tokio::test]
    async fn slow_root_times_out_without_blocking_others() {
        let tmp = tempfile::tempdir().unwrap();
        let slow = make_sdk(tmp.path(), "slow");
        let fast = make_sdk(tmp.path(), "fast");

        let probe = marker_probe();
        let stalling: Arc<dyn ProbeDirectory> =
            Arc::new(move |path: &Path| -> Result<Option<Candidate>> {
                if path.ends_with("slow") {
                    std::thread::sleep(Duration::from_millis(300));
                }
                probe.probe(path)
            });

        let mut options = DetectOptions::new(stalling);
        options.directories = vec![slow, fast.clone()];
        options.probe_timeout = Some(Duration::from_millis(50));
        let engine = DetectEngine::new(options);

        let set = engine.run().await;
        let paths: Vec<_> = set.iter().map(|c| c.path.clone()).collect();
        assert_eq!(paths, vec![fast.clone()]);
        assert_eq!(set.default_candidate().map(|c| c.path.clone()), Some(fast));
    }

    #[tokio::test]
    async fn registry_failure_degrades_to_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let a = make_sdk(tmp.path(), "a");

        let mut options = DetectOptions::new(marker_probe());
        options.directories = vec![a.clone()];
        options.registry = Some(Arc::new(BrokenRegistry));
        let engine = DetectEngine::new(options);

        let set = engine.run().await;
        assert_eq!(set.len(), 1);
        assert!(set.as_slice()[0].is_default);
    }

    #[tokio::test]
    async fn single_mode_truncates_to_first() {
        let tmp = tempfile::tempdir().unwrap();
        make_sdk(tmp.path(), "a");
        make_sdk(tmp.path(), "b");

        let mut options = DetectOptions::new(marker_probe());
        options.directories = vec![tmp.path().to_path_buf()];
        options.depth = 1;
        options.multiple = false;
        let engine = DetectEngine::new(options);

        let set = engine.run().await;
        assert_eq!(set.len(), 1);
        assert_eq!(set.as_slice()[0].path, tmp.path().join("a"));
    }

    #[tokio::test]
    async fn empty_pass_keeps_remembered_default() {
        let tmp = tempfile::tempdir().unwrap();
        let a = make_sdk(tmp.path(), "a");

        let mut options = DetectOptions::new(marker_probe());
        options.directories = vec![a.clone()];
        let engine = DetectEngine::new(options);

        engine.run().await;
        fs::remove_file(a.join("sdk.marker")).unwrap();
        let set = engine.run().await;
        assert!(set.is_empty());
        assert_eq!(
            engine.remembered_default().await,
            Some(RememberedDefault::Path(a))
        );
    }
}
