use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::ProbeDirectory;
use crate::types::Candidate;

/// Probe `root` and, while nothing is recognised and depth remains, its child
/// directories. Runs on the blocking pool; every probe call is isolated so a
/// failing or panicking probe only costs its own path.
pub(crate) fn walk_root(
    root: &Path,
    depth: usize,
    multiple: bool,
    probe: &dyn ProbeDirectory,
) -> Vec<Candidate> {
    let mut found = Vec::new();
    walk_inner(root, depth, multiple, probe, &mut found);
    found
}

fn walk_inner(
    dir: &Path,
    depth: usize,
    multiple: bool,
    probe: &dyn ProbeDirectory,
    found: &mut Vec<Candidate>,
) {
    if let Some(candidate) = probe_isolated(dir, probe) {
        found.push(candidate);
        return;
    }

    if depth == 0 {
        return;
    }

    for child in child_directories(dir) {
        walk_inner(&child, depth - 1, multiple, probe, found);
        if !multiple && !found.is_empty() {
            return;
        }
    }
}

fn probe_isolated(path: &Path, probe: &dyn ProbeDirectory) -> Option<Candidate> {
    match catch_unwind(AssertUnwindSafe(|| probe.probe(path))) {
        Ok(Ok(candidate)) => candidate,
        Ok(Err(err)) => {
            warn!(path = %path.display(), error = %err, "probe failed; treating as absent");
            None
        }
        Err(_) => {
            warn!(path = %path.display(), "probe panicked; treating as absent");
            None
        }
    }
}

/// Child directories sorted by name so discovery order is stable across
/// passes regardless of what order the OS lists them in.
fn child_directories(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(path = %dir.display(), error = %err, "skipping unreadable directory");
            return Vec::new();
        }
    };

    let mut children: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ty| ty.is_dir()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    children.sort();
    children
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{InfoError, Result};
    use crate::types::CandidateKind;

    fn marker_probe(path: &Path) -> Result<Option<Candidate>> {
        if path.join("sdk.marker").exists() {
            Ok(Some(Candidate::new(
                CandidateKind::Sdk,
                path,
                serde_json::Value::Null,
            )))
        } else {
            Ok(None)
        }
    }

    #[test]
    fn descends_until_depth_exhausted() {
        let tmp = tempfile::tempdir().unwrap();
        let shallow = tmp.path().join("10");
        let deep = tmp.path().join("nested").join("11");
        fs::create_dir_all(&shallow).unwrap();
        fs::create_dir_all(&deep).unwrap();
        fs::write(shallow.join("sdk.marker"), b"").unwrap();
        fs::write(deep.join("sdk.marker"), b"").unwrap();

        let found = walk_root(tmp.path(), 1, true, &marker_probe);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, shallow);

        let found = walk_root(tmp.path(), 2, true, &marker_probe);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn stops_at_first_hit_when_single() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["a", "b"] {
            let dir = tmp.path().join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("sdk.marker"), b"").unwrap();
        }

        let found = walk_root(tmp.path(), 1, false, &marker_probe);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, tmp.path().join("a"));
    }

    #[test]
    fn failing_and_panicking_probes_are_absent() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("bad")).unwrap();
        fs::create_dir_all(tmp.path().join("boom")).unwrap();
        let good = tmp.path().join("good");
        fs::create_dir_all(&good).unwrap();

        let probe = |path: &Path| -> Result<Option<Candidate>> {
            match path.file_name().and_then(|name| name.to_str()) {
                Some("bad") => Err(InfoError::probe(path, "unreadable manifest")),
                Some("boom") => panic!("probe blew up"),
                Some("good") => Ok(Some(Candidate::new(
                    CandidateKind::Sdk,
                    path,
                    serde_json::Value::Null,
                ))),
                _ => Ok(None),
            }
        };

        let found = walk_root(tmp.path(), 1, true, &probe);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, good);
    }

    #[test]
    fn missing_root_yields_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let found = walk_root(&tmp.path().join("absent"), 3, true, &marker_probe);
        assert!(found.is_empty());
    }
}
