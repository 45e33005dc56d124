//! External locator integration (e.g. `vswhere.exe`).

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{InfoError, Result};
use crate::types::{Candidate, CandidateKind};

/// Raw result of running a locator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocatorOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait ExternalLocator: Send + Sync {
    async fn detect(&self) -> Result<LocatorOutput>;

    /// Paths whose changes mean the locator itself was installed, updated or
    /// removed.
    fn watch_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Runs a locator executable and captures its output.
#[derive(Clone)]
pub struct CommandLocator {
    program: PathBuf,
    args: Vec<String>,
    extra_watch_paths: Vec<PathBuf>,
}

impl fmt::Debug for CommandLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandLocator")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("extra_watch_paths", &self.extra_watch_paths)
            .finish()
    }
}

impl CommandLocator {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            extra_watch_paths: Vec::new(),
        }
    }

    /// Also re-detect when any of `paths` change (e.g. installer state
    /// directories).
    pub fn with_watch_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.extra_watch_paths = paths;
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

#[async_trait]
impl ExternalLocator for CommandLocator {
    async fn detect(&self) -> Result<LocatorOutput> {
        if !self.program.exists() {
            return Err(InfoError::ExternalLocator(format!(
                "locator not installed at {}",
                self.program.display()
            )));
        }

        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                InfoError::ExternalLocator(format!(
                    "failed to run {}: {}",
                    self.program.display(),
                    err
                ))
            })?;

        Ok(LocatorOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn watch_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.program.clone()];
        paths.extend(self.extra_watch_paths.iter().cloned());
        paths
    }
}

/// The subset of a locator instance record the engine relies on. Everything
/// else rides along in the candidate metadata untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdeDescriptor {
    pub instance_id: String,
    pub installation_path: PathBuf,
    #[serde(default)]
    pub installation_version: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl IdeDescriptor {
    /// Default constructor for locator records: keyed by instance id, located
    /// at the installation path, raw record kept as metadata.
    pub fn candidate_from_raw(raw: serde_json::Value) -> Result<Candidate> {
        let descriptor: IdeDescriptor = serde_json::from_value(raw.clone())?;
        Ok(Candidate::with_key(
            CandidateKind::Ide,
            descriptor.instance_id,
            descriptor.installation_path,
            raw,
        ))
    }
}

/// Turn locator output into candidates.
///
/// A non-zero exit code or stdout that is not a JSON array fails the whole
/// pass so the caller can keep its previous state. Individual records the
/// constructor rejects are skipped.
pub fn candidates_from_output<F>(output: &LocatorOutput, constructor: F) -> Result<Vec<Candidate>>
where
    F: Fn(serde_json::Value) -> Result<Candidate>,
{
    if output.exit_code != 0 {
        return Err(InfoError::ExternalLocator(format!(
            "locator exited with code {}: {}",
            output.exit_code,
            output.stderr.trim()
        )));
    }

    let records: Vec<serde_json::Value> = serde_json::from_str(&output.stdout)
        .map_err(|err| InfoError::ExternalLocator(format!("malformed locator output: {err}")))?;

    let mut candidates = Vec::with_capacity(records.len());
    for record in records {
        match constructor(record) {
            Ok(candidate) => candidates.push(candidate),
            Err(err) => warn!(error = %err, "skipping unrecognised locator record"),
        }
    }

    debug!(count = candidates.len(), "locator records converted");
    Ok(candidates)
}
