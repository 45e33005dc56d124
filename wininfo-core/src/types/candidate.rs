use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ids::EntityKey;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CandidateKind {
    Sdk,
    Ide,
    Device,
}

/// One installation instance reported by a probe.
///
/// `metadata` is owned by the probe (version strings, vendor ids,
/// capabilities); the engine never looks inside it. `is_default` is only ever
/// written by default-selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub key: EntityKey,
    pub path: PathBuf,
    pub kind: CandidateKind,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default, rename = "default")]
    pub is_default: bool,
}

impl Candidate {
    /// Candidate keyed by its own path.
    pub fn new(kind: CandidateKind, path: impl Into<PathBuf>, metadata: serde_json::Value) -> Self {
        let path = path.into();
        Self {
            key: EntityKey::from_path(&path),
            path,
            kind,
            metadata,
            is_default: false,
        }
    }

    /// Candidate keyed by an identifier other than its path, such as a
    /// locator instance id.
    pub fn with_key(
        kind: CandidateKind,
        key: impl Into<EntityKey>,
        path: impl Into<PathBuf>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
            kind,
            metadata,
            is_default: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Ordered result of one detection pass for one category.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct CandidateSet(Vec<Candidate>);

impl CandidateSet {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        CandidateSet(candidates)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Candidate] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [Candidate] {
        &mut self.0
    }

    pub fn first(&self) -> Option<&Candidate> {
        self.0.first()
    }

    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }

    pub fn default_candidate(&self) -> Option<&Candidate> {
        self.0.iter().find(|candidate| candidate.is_default)
    }

    pub fn keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.0.iter().map(|candidate| &candidate.key)
    }

    pub fn get(&self, key: &EntityKey) -> Option<&Candidate> {
        self.0.iter().find(|candidate| &candidate.key == key)
    }

    pub fn into_vec(self) -> Vec<Candidate> {
        self.0
    }
}

impl From<Vec<Candidate>> for CandidateSet {
    fn from(value: Vec<Candidate>) -> Self {
        CandidateSet(value)
    }
}

impl FromIterator<Candidate> for CandidateSet {
    fn from_iter<I: IntoIterator<Item = Candidate>>(iter: I) -> Self {
        CandidateSet(iter.into_iter().collect())
    }
}

impl IntoIterator for CandidateSet {
    type Item = Candidate;
    type IntoIter = std::vec::IntoIter<Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a CandidateSet {
    type Item = &'a Candidate;
    type IntoIter = std::slice::Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
