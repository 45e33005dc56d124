//! Detection passes.
//!
//! A pass fans a [`ProbeDirectory`] out over candidate roots (configured
//! directories plus whatever a [`RegistryProbe`] reports), collects the
//! recognised installs in discovery order, and runs default-selection. The
//! probes themselves are supplied by the host; this module owns only the
//! orchestration and the failure policy around them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Candidate;

pub mod engine;
pub mod locator;
pub mod selection;
mod walk;

pub use engine::{DetectEngine, DetectOptions};
pub use locator::{CommandLocator, ExternalLocator, IdeDescriptor, LocatorOutput};
pub use selection::{DefaultPolicy, RememberedDefault};

/// Inspects one directory and decides whether it is a valid install.
///
/// Called on the blocking pool. Errors and panics are contained to the path
/// being probed.
pub trait ProbeDirectory: Send + Sync {
    fn probe(&self, path: &Path) -> Result<Option<Candidate>>;
}

impl<F> ProbeDirectory for F
where
    F: Fn(&Path) -> Result<Option<Candidate>> + Send + Sync,
{
    fn probe(&self, path: &Path) -> Result<Option<Candidate>> {
        self(path)
    }
}

/// Enumerates install roots recorded in the OS registry. Lack of registry
/// access should surface as an error; the engine degrades it to no paths.
#[async_trait]
pub trait RegistryProbe: Send + Sync {
    async fn paths(&self) -> Result<Vec<PathBuf>>;
}
