use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::debounce::{DebouncedHandler, Debouncer};
use super::{WatchEvent, WatchEventStream, WatchHandler, WatchRequest, WatchService};
use crate::error::Result;
use crate::types::{EntityKey, SubscriptionId};

/// Options for [`WatchSubscriptionRegistry::ensure`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    pub recursive: bool,
    pub depth: Option<usize>,
    /// Route events through the registry's debouncer.
    pub debounce: bool,
}

impl WatchOptions {
    pub fn debounced() -> Self {
        Self {
            debounce: true,
            ..Self::default()
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.recursive = true;
        self.depth = Some(depth);
        self
    }
}

/// Snapshot of one active subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEntry {
    pub entity_key: EntityKey,
    pub subscription_id: SubscriptionId,
    pub watched_paths: BTreeSet<PathBuf>,
    pub debounced: bool,
}

struct ActiveWatch {
    entry: WatchEntry,
    pump: JoinHandle<()>,
    debouncer: Option<DebouncedHandler<WatchEvent>>,
}

impl ActiveWatch {
    fn shutdown(self) {
        if let Some(debouncer) = &self.debouncer {
            debouncer.cancel();
        }
        self.pump.abort();
    }
}

impl fmt::Debug for ActiveWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveWatch")
            .field("entry", &self.entry)
            .field("pump_finished", &self.pump.is_finished())
            .finish()
    }
}

type Entries = Mutex<HashMap<EntityKey, ActiveWatch>>;

/// Keeps exactly one watch subscription per currently relevant entity.
///
/// Every subscribe and unsubscribe maps to exactly one call on the
/// underlying [`WatchService`]. Entries are only created after a successful
/// subscribe and only removed after a successful unsubscribe, so a failed
/// call is repaired by the next `ensure`/`reconcile`. The one exception is a
/// subscription whose event stream ends: the transport has already dropped
/// it, so its entry is removed without an unsubscribe and the next `ensure`
/// subscribes again.
pub struct WatchSubscriptionRegistry {
    label: String,
    service: Arc<dyn WatchService>,
    debouncer: Debouncer,
    entries: Arc<Entries>,
}

impl fmt::Debug for WatchSubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("WatchSubscriptionRegistry");
        debug
            .field("label", &self.label)
            .field("debounce_window", &self.debouncer.window());
        match self.entries.try_lock() {
            Ok(guard) => debug.field("entries", &guard.len()),
            Err(_) => debug.field("entries", &"<locked>"),
        };
        debug.finish()
    }
}

impl WatchSubscriptionRegistry {
    pub fn new(
        label: impl Into<String>,
        service: Arc<dyn WatchService>,
        debouncer: Debouncer,
    ) -> Self {
        Self {
            label: label.into(),
            service,
            debouncer,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe `key` unless it already has an active subscription.
    /// Returns whether a new subscription was created.
    pub async fn ensure(
        &self,
        key: EntityKey,
        paths: Vec<PathBuf>,
        handler: WatchHandler,
        options: WatchOptions,
    ) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&key) {
            return Ok(false);
        }

        let request = WatchRequest {
            paths: paths.clone(),
            recursive: options.recursive,
            depth: options.depth,
        };
        let subscription = self.service.subscribe(request).await.map_err(|err| {
            warn!(registry = %self.label, entity = %key, error = %err, "watch subscribe failed");
            err
        })?;

        let debouncer = options.debounce.then(|| {
            let handler = Arc::clone(&handler);
            self.debouncer.wrap(move |event: WatchEvent| handler(event))
        });
        let pump = spawn_pump(
            subscription.events,
            handler,
            debouncer.clone(),
            StreamEnd {
                entries: Arc::downgrade(&self.entries),
                label: self.label.clone(),
                key: key.clone(),
                subscription_id: subscription.id,
            },
        );

        debug!(
            registry = %self.label,
            entity = %key,
            subscription = %subscription.id,
            paths = paths.len(),
            "watch subscribed"
        );

        entries.insert(
            key.clone(),
            ActiveWatch {
                entry: WatchEntry {
                    entity_key: key,
                    subscription_id: subscription.id,
                    watched_paths: paths.into_iter().collect(),
                    debounced: options.debounce,
                },
                pump,
                debouncer,
            },
        );
        Ok(true)
    }

    /// Unsubscribe `key` if present. Returns whether a subscription was
    /// released.
    pub async fn release(&self, key: &EntityKey) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        self.release_locked(&mut entries, key).await
    }

    /// Release every entry whose key is not in `current`. Present entries are
    /// left untouched; new keys are the caller's job (`ensure`). Returns the
    /// released keys. Failed unsubscribes are logged and left for the next
    /// reconcile.
    pub async fn reconcile(&self, current: &HashSet<EntityKey>) -> Vec<EntityKey> {
        let mut entries = self.entries.lock().await;
        let mut stale: Vec<EntityKey> = entries
            .keys()
            .filter(|key| !current.contains(*key))
            .cloned()
            .collect();
        stale.sort();

        let mut released = Vec::with_capacity(stale.len());
        for key in stale {
            match self.release_locked(&mut entries, &key).await {
                Ok(true) => released.push(key),
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        registry = %self.label,
                        entity = %key,
                        error = %err,
                        "stale watch not released; will retry"
                    );
                }
            }
        }
        released
    }

    /// Tear down every subscription. Local event delivery stops for every
    /// entry even when the transport refuses the unsubscribe.
    pub async fn release_all(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let drained: Vec<(EntityKey, ActiveWatch)> = entries.drain().collect();
        drop(entries);

        let count = drained.len();
        for (key, active) in drained {
            if let Err(err) = self.service.unsubscribe(active.entry.subscription_id).await {
                warn!(
                    registry = %self.label,
                    entity = %key,
                    error = %err,
                    "unsubscribe failed during teardown"
                );
            }
            active.shutdown();
        }
        count
    }

    pub async fn contains(&self, key: &EntityKey) -> bool {
        self.entries.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<EntityKey> {
        let mut keys: Vec<_> = self.entries.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn entry(&self, key: &EntityKey) -> Option<WatchEntry> {
        self.entries
            .lock()
            .await
            .get(key)
            .map(|active| active.entry.clone())
    }

    async fn release_locked(
        &self,
        entries: &mut HashMap<EntityKey, ActiveWatch>,
        key: &EntityKey,
    ) -> Result<bool> {
        let Some(active) = entries.get(key) else {
            return Ok(false);
        };

        let subscription_id = active.entry.subscription_id;
        self.service
            .unsubscribe(subscription_id)
            .await
            .map_err(|err| {
                warn!(
                    registry = %self.label,
                    entity = %key,
                    error = %err,
                    "watch unsubscribe failed"
                );
                err
            })?;

        if let Some(active) = entries.remove(key) {
            active.shutdown();
        }
        debug!(
            registry = %self.label,
            entity = %key,
            subscription = %subscription_id,
            "watch released"
        );
        Ok(true)
    }
}

/// Where a pump reports that its subscription's stream has ended.
struct StreamEnd {
    entries: Weak<Entries>,
    label: String,
    key: EntityKey,
    subscription_id: SubscriptionId,
}

impl StreamEnd {
    async fn forget(self) {
        let Some(entries) = self.entries.upgrade() else {
            return;
        };
        let mut entries = entries.lock().await;
        // The key may already belong to a newer subscription.
        if entries
            .get(&self.key)
            .is_some_and(|active| active.entry.subscription_id == self.subscription_id)
        {
            // Not `shutdown`: this is the pump itself, already finishing.
            if let Some(debouncer) = entries
                .remove(&self.key)
                .and_then(|active| active.debouncer)
            {
                debouncer.cancel();
            }
            debug!(
                registry = %self.label,
                entity = %self.key,
                subscription = %self.subscription_id,
                "watch stream ended; entry dropped"
            );
        }
    }
}

fn spawn_pump(
    mut events: WatchEventStream,
    handler: WatchHandler,
    debouncer: Option<DebouncedHandler<WatchEvent>>,
    ended: StreamEnd,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match &debouncer {
                Some(debouncer) => debouncer.call(event),
                None => handler(event),
            }
        }
        ended.forget().await;
    })
}
