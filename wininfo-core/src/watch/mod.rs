//! Filesystem watch plumbing.
//!
//! The transport is abstracted behind [`WatchService`]; on top of it the
//! [`WatchSubscriptionRegistry`] keeps exactly one subscription per tracked
//! entity and the [`Debouncer`] collapses event bursts into a single trailing
//! "re-check" signal.

use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::SubscriptionId;

pub mod debounce;
#[cfg(feature = "notify")]
#[cfg_attr(docsrs, doc(cfg(feature = "notify")))]
pub mod native;
pub mod registry;

pub use debounce::{DebouncedHandler, Debouncer};
#[cfg(feature = "notify")]
pub use native::NotifyWatchService;
pub use registry::{WatchEntry, WatchOptions, WatchSubscriptionRegistry};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WatchAction {
    Add,
    Change,
    Unlink,
}

/// One filesystem notification delivered by a [`WatchService`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchEvent {
    pub action: WatchAction,
    pub path: PathBuf,
}

impl WatchEvent {
    pub fn new(action: WatchAction, path: impl Into<PathBuf>) -> Self {
        Self {
            action,
            path: path.into(),
        }
    }
}

/// What to watch for one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    pub paths: Vec<PathBuf>,
    pub recursive: bool,
    /// Maximum depth below each path when `recursive` is set.
    pub depth: Option<usize>,
}

/// Stream of events for one subscription. Ends when the subscription is
/// released or the transport goes away.
pub type WatchEventStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send>>;

pub struct WatchSubscription {
    pub id: SubscriptionId,
    pub events: WatchEventStream,
}

impl fmt::Debug for WatchSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchSubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Callback invoked for every (possibly debounced) event of a subscription.
pub type WatchHandler = Arc<dyn Fn(WatchEvent) + Send + Sync>;

#[async_trait]
pub trait WatchService: Send + Sync {
    async fn subscribe(&self, request: WatchRequest) -> Result<WatchSubscription>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}
