//! Observable state shared with external consumers.
//!
//! The store holds the best-known SDK list, IDE map and device list. Values
//! are replaced wholesale through [`ReactiveStore::set`], which diffs the new
//! value against the current one and notifies observers only when something
//! actually changed.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{InfoError, Result};
use crate::types::{Candidate, CandidateSet, Category, EntityKey};

/// Value stored under one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoreValue {
    List(CandidateSet),
    Map(BTreeMap<EntityKey, Candidate>),
}

impl StoreValue {
    fn empty_for(category: Category) -> Self {
        match category {
            Category::Ide => StoreValue::Map(BTreeMap::new()),
            Category::Sdk | Category::Devices => StoreValue::List(CandidateSet::default()),
        }
    }

    fn fits(&self, category: Category) -> bool {
        matches!(
            (category, self),
            (Category::Ide, StoreValue::Map(_))
                | (Category::Sdk | Category::Devices, StoreValue::List(_))
        )
    }

    pub fn len(&self) -> usize {
        match self {
            StoreValue::List(set) => set.len(),
            StoreValue::Map(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Candidates in their stored order (key order for maps).
    pub fn candidates(&self) -> Vec<&Candidate> {
        match self {
            StoreValue::List(set) => set.iter().collect(),
            StoreValue::Map(map) => map.values().collect(),
        }
    }

    pub fn as_list(&self) -> Option<&CandidateSet> {
        match self {
            StoreValue::List(set) => Some(set),
            StoreValue::Map(_) => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<EntityKey, Candidate>> {
        match self {
            StoreValue::Map(map) => Some(map),
            StoreValue::List(_) => None,
        }
    }
}

impl From<CandidateSet> for StoreValue {
    fn from(value: CandidateSet) -> Self {
        StoreValue::List(value)
    }
}

impl From<BTreeMap<EntityKey, Candidate>> for StoreValue {
    fn from(value: BTreeMap<EntityKey, Candidate>) -> Self {
        StoreValue::Map(value)
    }
}

/// Structural difference between two values of one category, keyed by
/// entity key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDiff {
    pub added: Vec<EntityKey>,
    pub removed: Vec<EntityKey>,
    pub updated: Vec<EntityKey>,
    /// Same members with the same content, different order.
    pub reordered: bool,
}

impl StoreDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.updated.is_empty()
            && !self.reordered
    }

    fn between(previous: &StoreValue, current: &StoreValue) -> Self {
        let before: HashMap<&EntityKey, &Candidate> = previous
            .candidates()
            .into_iter()
            .map(|candidate| (&candidate.key, candidate))
            .collect();
        let after: HashMap<&EntityKey, &Candidate> = current
            .candidates()
            .into_iter()
            .map(|candidate| (&candidate.key, candidate))
            .collect();

        let mut diff = StoreDiff::default();
        for candidate in current.candidates() {
            match before.get(&candidate.key) {
                None => diff.added.push(candidate.key.clone()),
                Some(old) if *old != candidate => diff.updated.push(candidate.key.clone()),
                Some(_) => {}
            }
        }
        for candidate in previous.candidates() {
            if !after.contains_key(&candidate.key) {
                diff.removed.push(candidate.key.clone());
            }
        }

        if diff.added.is_empty() && diff.removed.is_empty() && diff.updated.is_empty() {
            diff.reordered = previous != current;
        }
        diff
    }
}

/// Notification delivered to observers after a successful `set`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreChange {
    pub category: Category,
    pub diff: StoreDiff,
    pub value: StoreValue,
}

/// Receives store changes. Called synchronously on the thread that performed
/// the `set`; observers must not call back into `set`.
pub trait StoreObserver: Send + Sync {
    fn on_change(&self, change: &StoreChange);
}

impl<F> StoreObserver for F
where
    F: Fn(&StoreChange) + Send + Sync,
{
    fn on_change(&self, change: &StoreChange) {
        self(change)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Serializable point-in-time view of the whole store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfoSnapshot {
    pub sdk: CandidateSet,
    #[serde(rename = "visualstudio")]
    pub ide: BTreeMap<EntityKey, Candidate>,
    pub devices: CandidateSet,
}

#[derive(Debug, Default)]
struct StoreState {
    sdk: CandidateSet,
    ide: BTreeMap<EntityKey, Candidate>,
    devices: CandidateSet,
}

impl StoreState {
    fn get(&self, category: Category) -> StoreValue {
        match category {
            Category::Sdk => StoreValue::List(self.sdk.clone()),
            Category::Ide => StoreValue::Map(self.ide.clone()),
            Category::Devices => StoreValue::List(self.devices.clone()),
        }
    }

    fn put(&mut self, category: Category, value: StoreValue) {
        match (category, value) {
            (Category::Sdk, StoreValue::List(set)) => self.sdk = set,
            (Category::Devices, StoreValue::List(set)) => self.devices = set,
            (Category::Ide, StoreValue::Map(map)) => self.ide = map,
            // `set` checks the shape before calling us.
            _ => {}
        }
    }
}

fn recover<T>(result: std::result::Result<T, PoisonError<T>>) -> T {
    result.unwrap_or_else(PoisonError::into_inner)
}

/// Process-wide observable state for one info service instance.
pub struct ReactiveStore {
    state: RwLock<StoreState>,
    observers: RwLock<Vec<(ObserverId, Arc<dyn StoreObserver>)>>,
    // Held from commit through notification so observers see sets in order.
    commit: Mutex<()>,
    next_observer: AtomicU64,
}

impl Default for ReactiveStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReactiveStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ReactiveStore");
        match self.state.try_read() {
            Ok(state) => debug
                .field("sdk", &state.sdk.len())
                .field("ide", &state.ide.len())
                .field("devices", &state.devices.len()),
            Err(_) => debug.field("state", &"<locked>"),
        };
        match self.observers.try_read() {
            Ok(observers) => debug.field("observers", &observers.len()),
            Err(_) => debug.field("observers", &"<locked>"),
        };
        debug.finish()
    }
}

impl ReactiveStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            observers: RwLock::new(Vec::new()),
            commit: Mutex::new(()),
            next_observer: AtomicU64::new(0),
        }
    }

    /// Replace the value for `category`. Returns `Ok(false)` without
    /// notifying anyone when the new value is structurally equal to the
    /// current one.
    pub fn set(&self, category: Category, value: impl Into<StoreValue>) -> Result<bool> {
        let value = value.into();
        if !value.fits(category) {
            return Err(InfoError::Internal(format!(
                "value shape does not match store path {category}"
            )));
        }

        let _commit: MutexGuard<'_, ()> = recover(self.commit.lock());

        let diff = {
            let mut state = recover(self.state.write());
            let current = state.get(category);
            if current == value {
                return Ok(false);
            }
            let diff = StoreDiff::between(&current, &value);
            state.put(category, value.clone());
            diff
        };

        let change = StoreChange {
            category,
            diff,
            value,
        };
        let observers: Vec<Arc<dyn StoreObserver>> = recover(self.observers.read())
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer.on_change(&change);
        }

        Ok(true)
    }

    pub fn get(&self, category: Category) -> StoreValue {
        recover(self.state.read()).get(category)
    }

    pub fn sdk(&self) -> CandidateSet {
        recover(self.state.read()).sdk.clone()
    }

    pub fn ide(&self) -> BTreeMap<EntityKey, Candidate> {
        recover(self.state.read()).ide.clone()
    }

    pub fn devices(&self) -> CandidateSet {
        recover(self.state.read()).devices.clone()
    }

    pub fn snapshot(&self) -> InfoSnapshot {
        let state = recover(self.state.read());
        InfoSnapshot {
            sdk: state.sdk.clone(),
            ide: state.ide.clone(),
            devices: state.devices.clone(),
        }
    }

    /// Register an observer. Observers are notified in registration order.
    pub fn subscribe(&self, observer: impl StoreObserver + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        recover(self.observers.write()).push((id, Arc::new(observer)));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = recover(self.observers.write());
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Channel-backed observer for async consumers.
    pub fn changes(&self) -> (ObserverId, mpsc::UnboundedReceiver<StoreChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |change: &StoreChange| {
            let _ = tx.send(change.clone());
        });
        (id, rx)
    }

    /// Reset every category to empty without notifying anyone.
    pub(crate) fn clear_silently(&self) {
        let _commit = recover(self.commit.lock());
        let mut state = recover(self.state.write());
        for category in Category::ALL {
            state.put(category, StoreValue::empty_for(category));
        }
    }
}
