//! [`WatchService`] backed by the host's native notifications via `notify`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;
use tracing::{debug, warn};

use super::{WatchAction, WatchEvent, WatchRequest, WatchService, WatchSubscription};
use crate::error::{InfoError, Result};
use crate::types::SubscriptionId;

/// Native filesystem watcher. Each subscription owns one `notify` watcher
/// per requested path; dropping them on unsubscribe ends the event stream.
///
/// Paths that do not exist yet are watched through their nearest existing
/// ancestor so their creation is still reported.
#[derive(Default)]
pub struct NotifyWatchService {
    subscriptions: Arc<Mutex<HashMap<SubscriptionId, Vec<RecommendedWatcher>>>>,
}

impl fmt::Debug for NotifyWatchService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("NotifyWatchService");
        match self.subscriptions.try_lock() {
            Ok(guard) => debug.field("subscriptions", &guard.len()),
            Err(_) => debug.field("subscriptions", &"<locked>"),
        };
        debug.finish()
    }
}

impl NotifyWatchService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }
}

#[async_trait]
impl WatchService for NotifyWatchService {
    async fn subscribe(&self, request: WatchRequest) -> Result<WatchSubscription> {
        let (tx, rx) = unbounded();
        let watchers = spawn_blocking(move || init_watchers(request, tx))
            .await
            .map_err(|err| {
                InfoError::WatchSubscription(format!("watcher initialization panicked: {err}"))
            })??;

        let id = SubscriptionId::new();
        self.subscriptions.lock().await.insert(id, watchers);
        debug!(subscription = %id, "notify subscription created");

        Ok(WatchSubscription {
            id,
            events: Box::pin(rx),
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        match self.subscriptions.lock().await.remove(&id) {
            // Dropping the watchers closes the sender and ends the stream.
            Some(_) => Ok(()),
            None => Err(InfoError::WatchSubscription(format!(
                "unknown subscription {id}"
            ))),
        }
    }
}

fn init_watchers(
    request: WatchRequest,
    tx: UnboundedSender<WatchEvent>,
) -> Result<Vec<RecommendedWatcher>> {
    let mut watchers = Vec::with_capacity(request.paths.len());

    for target in &request.paths {
        let (watch_root, mode) = if target.exists() {
            let mode = if request.recursive {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            (target.clone(), mode)
        } else {
            let ancestor = nearest_existing_ancestor(target).ok_or_else(|| {
                InfoError::WatchSubscription(format!(
                    "no existing ancestor to watch for {}",
                    target.display()
                ))
            })?;
            (ancestor, RecursiveMode::NonRecursive)
        };

        let filter = EventFilter {
            target: target.clone(),
            depth: request.recursive.then_some(request.depth).flatten(),
        };
        let tx_event = tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for converted in convert_event(&event) {
                        if filter.accepts(&converted.path)
                            && tx_event.unbounded_send(converted).is_err()
                        {
                            // Receiver gone: the subscription is being released.
                            return;
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        path = %filter.target.display(),
                        error = %err,
                        "watch error; forcing re-check"
                    );
                    let event = WatchEvent::new(WatchAction::Change, filter.target.clone());
                    let _ = tx_event.unbounded_send(event);
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|err| {
            InfoError::WatchSubscription(format!(
                "failed to create watcher for {}: {}",
                target.display(),
                err
            ))
        })?;

        watcher.watch(&watch_root, mode).map_err(|err| {
            InfoError::WatchSubscription(format!(
                "failed to watch {}: {}",
                watch_root.display(),
                err
            ))
        })?;

        watchers.push(watcher);
    }

    Ok(watchers)
}

struct EventFilter {
    target: PathBuf,
    depth: Option<usize>,
}

impl EventFilter {
    /// Keep events at or below the target (within depth) and events on the
    /// target's ancestors, which announce that the target may have appeared.
    fn accepts(&self, path: &Path) -> bool {
        if let Ok(rel) = path.strip_prefix(&self.target) {
            return match self.depth {
                Some(depth) => rel.components().count() <= depth,
                None => true,
            };
        }
        self.target.starts_with(path)
    }
}

fn nearest_existing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .skip(1)
        .find(|ancestor| !ancestor.as_os_str().is_empty() && ancestor.exists())
        .map(Path::to_path_buf)
}

fn convert_event(event: &Event) -> Vec<WatchEvent> {
    let mut paths = event.paths.iter();
    let Some(first) = paths.next() else {
        return Vec::new();
    };

    match event.kind {
        EventKind::Access(_) => Vec::new(),
        EventKind::Create(_) => vec![WatchEvent::new(WatchAction::Add, first.clone())],
        EventKind::Remove(_) => vec![WatchEvent::new(WatchAction::Unlink, first.clone())],
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            vec![WatchEvent::new(WatchAction::Unlink, first.clone())]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            vec![WatchEvent::new(WatchAction::Add, first.clone())]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut converted = vec![WatchEvent::new(WatchAction::Unlink, first.clone())];
            if let Some(second) = paths.next() {
                converted.push(WatchEvent::new(WatchAction::Add, second.clone()));
            }
            converted
        }
        _ => vec![WatchEvent::new(WatchAction::Change, first.clone())],
    }
}
