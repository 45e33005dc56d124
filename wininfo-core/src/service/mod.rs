//! The info service: owns the store, one detection worker per category,
//! the device poll loop and every watch subscription, and tears all of it
//! down on deactivation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::detect::{
    DefaultPolicy, DetectEngine, DetectOptions, ExternalLocator, IdeDescriptor, ProbeDirectory,
    RegistryProbe,
};
use crate::error::{InfoError, Result};
use crate::store::{InfoSnapshot, ReactiveStore};
use crate::types::{Candidate, Category};
use crate::watch::{Debouncer, WatchService, WatchSubscriptionRegistry};

pub mod config;
mod devices;
mod ide;
mod sdk;
pub mod state;
mod trigger;

pub use config::{DeviceConfig, IdeDetectConfig, InfoServiceConfig, SdkDetectConfig, WatchConfig};
pub use devices::DeviceProbe;
pub use state::{CategoryState, StateTracker};
pub use trigger::DetectTrigger;

use devices::DeviceLoop;
use ide::IdeWorker;
use sdk::SdkWorker;
use trigger::{CategoryWorker, TriggerHandle, spawn_worker};

/// Builds a candidate from one raw locator record.
pub type CandidateConstructor =
    Arc<dyn Fn(serde_json::Value) -> Result<Candidate> + Send + Sync>;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Host-supplied collaborators.
#[derive(Clone)]
pub struct InfoServiceDeps {
    pub watch: Arc<dyn WatchService>,
    pub sdk_probe: Arc<dyn ProbeDirectory>,
    pub registry: Option<Arc<dyn RegistryProbe>>,
    pub ide_locator: Option<Arc<dyn ExternalLocator>>,
    pub ide_constructor: CandidateConstructor,
    pub device_probe: Option<Arc<dyn DeviceProbe>>,
}

impl InfoServiceDeps {
    pub fn new(watch: Arc<dyn WatchService>, sdk_probe: Arc<dyn ProbeDirectory>) -> Self {
        Self {
            watch,
            sdk_probe,
            registry: None,
            ide_locator: None,
            ide_constructor: Arc::new(IdeDescriptor::candidate_from_raw),
            device_probe: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn RegistryProbe>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_ide_locator(mut self, locator: Arc<dyn ExternalLocator>) -> Self {
        self.ide_locator = Some(locator);
        self
    }

    pub fn with_ide_constructor(mut self, constructor: CandidateConstructor) -> Self {
        self.ide_constructor = constructor;
        self
    }

    pub fn with_device_probe(mut self, probe: Arc<dyn DeviceProbe>) -> Self {
        self.device_probe = Some(probe);
        self
    }
}

impl fmt::Debug for InfoServiceDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfoServiceDeps")
            .field("registry", &self.registry.is_some())
            .field("ide_locator", &self.ide_locator.is_some())
            .field("device_probe", &self.device_probe.is_some())
            .finish_non_exhaustive()
    }
}

/// Everything spawned by one activation.
struct ServiceRuntime {
    triggers: HashMap<Category, TriggerHandle>,
    registries: Vec<Arc<WatchSubscriptionRegistry>>,
    devices: Option<Arc<DeviceLoop>>,
    worker_handles: Vec<JoinHandle<()>>,
}

/// Detects Windows SDKs, Visual Studio instances and devices, and keeps the
/// [`ReactiveStore`] current until deactivated.
///
/// A service activates at most once. Deactivation is terminal and
/// idempotent.
pub struct InfoService {
    config: InfoServiceConfig,
    deps: InfoServiceDeps,
    store: Arc<ReactiveStore>,
    states: StateTracker,
    shutdown_token: CancellationToken,
    runtime: Mutex<Option<ServiceRuntime>>,
}

impl fmt::Debug for InfoService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InfoService");
        debug
            .field("config", &self.config)
            .field("deps", &self.deps)
            .field("states", &self.states)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled());
        match self.runtime.try_lock() {
            Ok(guard) => debug.field("active", &guard.is_some()),
            Err(_) => debug.field("active", &"<locked>"),
        };
        debug.finish()
    }
}

impl InfoService {
    pub fn new(config: InfoServiceConfig, deps: InfoServiceDeps) -> Self {
        Self {
            config,
            deps,
            store: Arc::new(ReactiveStore::new()),
            states: StateTracker::new(),
            shutdown_token: CancellationToken::new(),
            runtime: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &InfoServiceConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<ReactiveStore> {
        Arc::clone(&self.store)
    }

    pub fn snapshot(&self) -> InfoSnapshot {
        self.store.snapshot()
    }

    pub fn state(&self, category: Category) -> CategoryState {
        self.states.get(category)
    }

    /// Run the first pass of every enabled category, then start the
    /// workers, poll timers and watches that keep the store current.
    /// Returns once the first passes have committed.
    pub async fn activate(&self) -> Result<()> {
        if self.shutdown_token.is_cancelled() {
            return Err(InfoError::Cancelled(
                "info service has been deactivated".into(),
            ));
        }

        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            return Ok(());
        }
        // `deactivate` may have won the lock while we waited.
        if self.shutdown_token.is_cancelled() {
            return Err(InfoError::Cancelled(
                "info service has been deactivated".into(),
            ));
        }
        info!("activating info service");
        self.store.clear_silently();

        let debouncer = Debouncer::new(self.config.watch.debounce_window());
        let registry = |label: &str| {
            Arc::new(WatchSubscriptionRegistry::new(
                label,
                Arc::clone(&self.deps.watch),
                debouncer,
            ))
        };

        let devices = match (&self.deps.device_probe, self.config.devices.enabled) {
            (Some(probe), true) => Some(Arc::new(DeviceLoop::new(
                Arc::clone(probe),
                Arc::clone(&self.store),
                self.states.clone(),
                self.config.devices.poll_interval(),
                self.shutdown_token.child_token(),
            ))),
            _ => None,
        };

        let mut triggers = HashMap::new();
        let mut registries = Vec::new();
        let mut workers: Vec<(Arc<dyn CategoryWorker>, _, Option<Duration>)> = Vec::new();

        let sdk_config = &self.config.sdk;
        let mut options = DetectOptions::new(Arc::clone(&self.deps.sdk_probe));
        options.directories = sdk_config.directories.clone();
        options.registry = if sdk_config.registry {
            self.deps.registry.clone()
        } else {
            None
        };
        options.multiple = sdk_config.multiple;
        options.depth = sdk_config.depth;
        options.redetect = sdk_config.redetect;
        options.watch = sdk_config.watch;
        options.default_policy = DefaultPolicy::StickyPath;
        options.probe_timeout = sdk_config.probe_timeout();

        let (sdk_trigger, sdk_rx) = TriggerHandle::channel(Category::Sdk);
        let sdk_roots = registry("sdk-roots");
        let sdk_entities = registry("sdk");
        registries.extend([Arc::clone(&sdk_roots), Arc::clone(&sdk_entities)]);
        triggers.insert(Category::Sdk, sdk_trigger.clone());
        let sdk: Arc<dyn CategoryWorker> = Arc::new(SdkWorker {
            engine: DetectEngine::new(options),
            store: Arc::clone(&self.store),
            states: self.states.clone(),
            roots: sdk_roots,
            entities: sdk_entities,
            trigger: sdk_trigger,
            devices: devices.clone(),
            shutdown: self.shutdown_token.clone(),
        });
        workers.push((sdk, sdk_rx, sdk_config.poll_interval()));

        let ide_config = &self.config.ide;
        match (&self.deps.ide_locator, ide_config.enabled) {
            (Some(locator), true) => {
                let (ide_trigger, ide_rx) = TriggerHandle::channel(Category::Ide);
                let ide_roots = registry("ide-roots");
                let ide_releases = registry("ide-releases");
                let ide_entities = registry("ide");
                registries.extend([
                    Arc::clone(&ide_roots),
                    Arc::clone(&ide_releases),
                    Arc::clone(&ide_entities),
                ]);
                triggers.insert(Category::Ide, ide_trigger.clone());
                let ide: Arc<dyn CategoryWorker> = Arc::new(IdeWorker {
                    locator: Arc::clone(locator),
                    constructor: Arc::clone(&self.deps.ide_constructor),
                    install_roots: ide_config.install_roots.clone(),
                    watch: ide_config.watch,
                    store: Arc::clone(&self.store),
                    states: self.states.clone(),
                    roots: ide_roots,
                    releases: ide_releases,
                    entities: ide_entities,
                    trigger: ide_trigger,
                    shutdown: self.shutdown_token.clone(),
                    remembered: Mutex::new(None),
                    armed_roots: Mutex::new(HashMap::new()),
                });
                workers.push((ide, ide_rx, ide_config.poll_interval()));
            }
            (None, true) => info!("no visual studio locator configured; skipping"),
            _ => {}
        }

        join_all(
            workers
                .iter()
                .map(|(worker, _, _)| worker.pass(DetectTrigger::Activation)),
        )
        .await;

        let mut worker_handles = Vec::new();
        for (worker, rx, poll_interval) in workers {
            let category = worker.category();
            if let Some(period) = poll_interval
                && let Some(trigger) = triggers.get(&category)
            {
                worker_handles.push(trigger.spawn_timer(period, self.shutdown_token.clone()));
            }
            worker_handles.push(spawn_worker(worker, rx, self.shutdown_token.clone()));
        }

        info!(
            sdk = self.store.sdk().len(),
            ide = self.store.ide().len(),
            devices = devices.is_some(),
            "info service activated"
        );

        *runtime = Some(ServiceRuntime {
            triggers,
            registries,
            devices,
            worker_handles,
        });
        Ok(())
    }

    /// Request a re-detection of `category`. Returns false when the category
    /// is not running. For devices this restarts polling if it had paused.
    pub async fn trigger(&self, category: Category) -> bool {
        let runtime = self.runtime.lock().await;
        let Some(runtime) = runtime.as_ref() else {
            return false;
        };
        match category {
            Category::Devices => match &runtime.devices {
                Some(devices) => devices.ensure_running().await || devices.is_running().await,
                None => false,
            },
            _ => runtime
                .triggers
                .get(&category)
                .is_some_and(|trigger| trigger.request(DetectTrigger::Manual)),
        }
    }

    /// Number of live watch subscriptions across every category.
    pub async fn watch_count(&self) -> usize {
        let runtime = self.runtime.lock().await;
        let Some(runtime) = runtime.as_ref() else {
            return 0;
        };
        let mut total = 0;
        for registry in &runtime.registries {
            total += registry.len().await;
        }
        total
    }

    /// Stop every worker, timer and poll loop and release every watch.
    /// Safe to call more than once, and before `activate`.
    pub async fn deactivate(&self) {
        self.shutdown_token.cancel();
        self.states.deactivate_all();

        let Some(runtime) = self.runtime.lock().await.take() else {
            return;
        };
        info!("deactivating info service");

        for handle in runtime.worker_handles {
            let abort = handle.abort_handle();
            match timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_cancelled() => {}
                Ok(Err(err)) => warn!("detection task failed: {err:?}"),
                Err(_) => {
                    warn!("detection task timed out during shutdown; aborting");
                    abort.abort();
                }
            }
        }

        if let Some(devices) = &runtime.devices {
            devices.stop(SHUTDOWN_GRACE).await;
        }

        let mut released = 0;
        for registry in &runtime.registries {
            released += registry.release_all().await;
        }

        info!(released, "info service deactivated");
    }
}
