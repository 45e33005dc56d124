//! Default-selection among the candidates of one detection pass.
//!
//! Selection is identity/position based and never looks at candidate
//! content: a previously selected default stays selected while it is still
//! present, otherwise the first candidate in discovery order wins.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{Candidate, EntityKey};

/// Which identity a category remembers its default by.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DefaultPolicy {
    /// Remember the default by install path (SDKs).
    #[default]
    StickyPath,
    /// Remember the default by entity key (locator instance ids).
    StickyKey,
}

/// The identity remembered from the last pass that produced a default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RememberedDefault {
    Path(PathBuf),
    Key(EntityKey),
}

impl RememberedDefault {
    fn matches(&self, candidate: &Candidate) -> bool {
        match self {
            RememberedDefault::Path(path) => &candidate.path == path,
            RememberedDefault::Key(key) => &candidate.key == key,
        }
    }
}

impl DefaultPolicy {
    /// The identity to remember for `candidate` under this policy.
    pub fn remember(&self, candidate: &Candidate) -> RememberedDefault {
        match self {
            DefaultPolicy::StickyPath => RememberedDefault::Path(candidate.path.clone()),
            DefaultPolicy::StickyKey => RememberedDefault::Key(candidate.key.clone()),
        }
    }

    /// Mark exactly one candidate as default and return its index, or `None`
    /// for an empty slice. Any probe-supplied `is_default` flags are cleared.
    ///
    /// A remembered identity of the other shape (path vs key) never matches, so
    /// switching policy falls back to first-in-order.
    pub fn select(
        &self,
        candidates: &mut [Candidate],
        remembered: Option<&RememberedDefault>,
    ) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        let sticky = remembered.and_then(|remembered| {
            let usable = matches!(
                (self, remembered),
                (DefaultPolicy::StickyPath, RememberedDefault::Path(_))
                    | (DefaultPolicy::StickyKey, RememberedDefault::Key(_))
            );
            if !usable {
                return None;
            }
            candidates
                .iter()
                .position(|candidate| remembered.matches(candidate))
        });
        let chosen = sticky.unwrap_or(0);

        for (idx, candidate) in candidates.iter_mut().enumerate() {
            candidate.is_default = idx == chosen;
        }

        Some(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CandidateKind;

    fn sdk(path: &str) -> Candidate {
        Candidate::new(CandidateKind::Sdk, path, serde_json::Value::Null)
    }

    fn ide(id: &str, path: &str) -> Candidate {
        Candidate::with_key(CandidateKind::Ide, id, path, serde_json::Value::Null)
    }

    #[test]
    fn first_candidate_wins_without_memory() {
        let mut set = vec![sdk("C:/A"), sdk("C:/B")];
        let chosen = DefaultPolicy::StickyPath.select(&mut set, None);
        assert_eq!(chosen, Some(0));
        assert!(set[0].is_default);
        assert!(!set[1].is_default);
    }

    #[test]
    fn remembered_path_wins_over_position() {
        let mut set = vec![sdk("C:/A"), sdk("C:/B")];
        let remembered = RememberedDefault::Path(PathBuf::from("C:/B"));
        let chosen = DefaultPolicy::StickyPath.select(&mut set, Some(&remembered));
        assert_eq!(chosen, Some(1));
        assert!(!set[0].is_default);
        assert!(set[1].is_default);
    }

    #[test]
    fn vanished_default_falls_back_to_first() {
        let mut set = vec![sdk("C:/C"), sdk("C:/A")];
        let remembered = RememberedDefault::Path(PathBuf::from("C:/B"));
        let chosen = DefaultPolicy::StickyPath.select(&mut set, Some(&remembered));
        assert_eq!(chosen, Some(0));
        assert_eq!(set.iter().filter(|c| c.is_default).count(), 1);
    }

    #[test]
    fn empty_set_has_no_default() {
        let mut set: Vec<Candidate> = Vec::new();
        assert_eq!(DefaultPolicy::StickyPath.select(&mut set, None), None);
    }

    #[test]
    fn probe_supplied_flags_are_overwritten() {
        let mut a = sdk("C:/A");
        let mut b = sdk("C:/B");
        a.is_default = true;
        b.is_default = true;
        let mut set = vec![a, b];
        DefaultPolicy::StickyPath.select(&mut set, None);
        assert_eq!(set.iter().filter(|c| c.is_default).count(), 1);
        assert!(set[0].is_default);
    }

    #[test]
    fn key_policy_tracks_instance_id_not_path() {
        // Same instance reinstalled to a new location keeps its default.
        let mut set = vec![ide("aaa", "D:/VS/2019"), ide("bbb", "D:/VS/2022-moved")];
        let remembered = RememberedDefault::Key(EntityKey::new("bbb"));
        let chosen = DefaultPolicy::StickyKey.select(&mut set, Some(&remembered));
        assert_eq!(chosen, Some(1));
    }

    #[test]
    fn mismatched_memory_shape_is_ignored() {
        let mut set = vec![ide("aaa", "D:/VS/2019"), ide("bbb", "D:/VS/2022")];
        let remembered = RememberedDefault::Path(PathBuf::from("D:/VS/2022"));
        let chosen = DefaultPolicy::StickyKey.select(&mut set, Some(&remembered));
        assert_eq!(chosen, Some(0));
    }
}
