//! Host adapters: how this process actually recognises an SDK, reads the
//! registry and lists devices.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;
use tracing::debug;
use wininfo_core::detect::locator::candidates_from_output;
use wininfo_core::detect::{LocatorOutput, ProbeDirectory, RegistryProbe};
use wininfo_core::service::DeviceProbe;
use wininfo_core::{Candidate, CandidateKind, InfoError, Result};

/// Recognises a Windows Kits root (e.g. `Windows Kits\10`) by its
/// `Include\<version>` directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsKitsProbe;

/// Parse `10.0.22621.0`-style directory names.
fn parse_revision(name: &str) -> Option<Vec<u32>> {
    let parts: Vec<u32> = name
        .split('.')
        .map(|part| part.parse().ok())
        .collect::<Option<_>>()?;
    (parts.len() >= 2).then_some(parts)
}

impl ProbeDirectory for WindowsKitsProbe {
    fn probe(&self, path: &Path) -> Result<Option<Candidate>> {
        let include = path.join("Include");
        if !include.is_dir() {
            return Ok(None);
        }

        let mut revisions: Vec<(Vec<u32>, String)> = fs::read_dir(&include)
            .map_err(|err| InfoError::probe(&include, err.to_string()))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                let parsed = parse_revision(&name)?;
                (parsed[0] >= 10).then_some((parsed, name))
            })
            .collect();

        if revisions.is_empty() {
            debug!(path = %path.display(), "no usable Include revisions");
            return Ok(None);
        }
        revisions.sort();

        let latest = &revisions[revisions.len() - 1].0;
        let version = format!("{}.{}", latest[0], latest[1]);
        let names: Vec<String> = revisions.into_iter().map(|(_, name)| name).collect();

        Ok(Some(Candidate::new(
            CandidateKind::Sdk,
            path,
            json!({ "version": version, "revisions": names }),
        )))
    }
}

const SDK_REGISTRY_KEYS: &[&str] = &[
    r"HKLM\SOFTWARE\WOW6432Node\Microsoft\Microsoft SDKs\Windows",
    r"HKLM\SOFTWARE\Microsoft\Microsoft SDKs\Windows",
];

/// Reads SDK install roots through `reg query`.
#[derive(Debug, Clone)]
pub struct RegQueryProbe {
    program: PathBuf,
    keys: Vec<String>,
}

impl Default for RegQueryProbe {
    fn default() -> Self {
        Self {
            program: PathBuf::from("reg"),
            keys: SDK_REGISTRY_KEYS.iter().map(|key| key.to_string()).collect(),
        }
    }
}

/// Extract `InstallationFolder` values from `reg query /s` output.
pub fn parse_installation_folders(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line.strip_prefix("InstallationFolder")?;
            let (_, value) = rest.split_once("REG_SZ")?;
            let value = value.trim().trim_end_matches('\\');
            (!value.is_empty()).then(|| PathBuf::from(value))
        })
        .collect()
}

#[async_trait]
impl RegistryProbe for RegQueryProbe {
    async fn paths(&self) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();
        let mut last_error = None;

        for key in &self.keys {
            let output = Command::new(&self.program)
                .args(["query", key, "/s", "/v", "InstallationFolder"])
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|err| InfoError::RegistryAccess(format!("failed to run reg: {err}")))?;

            if !output.status.success() {
                // A missing key is normal on 32-bit or partial installs.
                last_error = Some(String::from_utf8_lossy(&output.stderr).trim().to_string());
                continue;
            }

            let stdout = String::from_utf8_lossy(&output.stdout);
            for path in parse_installation_folders(&stdout) {
                if seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
        }

        match (paths.is_empty(), last_error) {
            (true, Some(err)) => Err(InfoError::RegistryAccess(err)),
            _ => Ok(paths),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceRecord {
    id: String,
}

fn device_from_raw(raw: serde_json::Value) -> Result<Candidate> {
    let record: DeviceRecord = serde_json::from_value(raw.clone())?;
    Ok(Candidate::with_key(
        CandidateKind::Device,
        record.id.clone(),
        record.id,
        raw,
    ))
}

/// Lists devices by running a configured program that prints a JSON array of
/// `{ "id": ..., ... }` records. The SDK in use is passed through
/// `WININFO_SDK_PATH`.
#[derive(Debug, Clone)]
pub struct CommandDeviceProbe {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandDeviceProbe {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl DeviceProbe for CommandDeviceProbe {
    async fn devices(&self, sdk: &Candidate) -> Result<Vec<Candidate>> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .env("WININFO_SDK_PATH", &sdk.path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                InfoError::probe(&self.program, format!("failed to run device command: {err}"))
            })?;

        let output = LocatorOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        candidates_from_output(&output, device_from_raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kit(revisions: &[&str]) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        for revision in revisions {
            fs::create_dir_all(root.path().join("Include").join(revision)).unwrap();
        }
        root
    }

    #[test]
    fn recognises_kit_with_revisions() {
        let root = kit(&["10.0.19041.0", "10.0.22621.0", "wdf"]);

        let candidate = WindowsKitsProbe.probe(root.path()).unwrap().unwrap();
        assert_eq!(candidate.path, root.path());
        assert_eq!(candidate.metadata["version"], "10.0");
        assert_eq!(
            candidate.metadata["revisions"],
            json!(["10.0.19041.0", "10.0.22621.0"])
        );
        assert!(!candidate.is_default);
    }

    #[test]
    fn ignores_pre_10_and_empty_kits() {
        assert!(WindowsKitsProbe.probe(kit(&["8.1"]).path()).unwrap().is_none());
        assert!(WindowsKitsProbe.probe(kit(&[]).path()).unwrap().is_none());
    }

    #[test]
    fn revisions_sort_numerically() {
        let root = kit(&["10.0.9000.0", "10.0.10240.0"]);
        let candidate = WindowsKitsProbe.probe(root.path()).unwrap().unwrap();
        assert_eq!(
            candidate.metadata["revisions"],
            json!(["10.0.9000.0", "10.0.10240.0"])
        );
    }

    #[test]
    fn parses_reg_query_output() {
        let output = r"
HKEY_LOCAL_MACHINE\SOFTWARE\WOW6432Node\Microsoft\Microsoft SDKs\Windows\v10.0
    InstallationFolder    REG_SZ    C:\Program Files (x86)\Windows Kits\10\

HKEY_LOCAL_MACHINE\SOFTWARE\WOW6432Node\Microsoft\Microsoft SDKs\Windows\v8.1
    InstallationFolder    REG_SZ    C:\Program Files (x86)\Windows Kits\8.1\

End of search: 2 match(es) found.
";
        assert_eq!(
            parse_installation_folders(output),
            vec![
                PathBuf::from(r"C:\Program Files (x86)\Windows Kits\10"),
                PathBuf::from(r"C:\Program Files (x86)\Windows Kits\8.1"),
            ]
        );
    }

    #[test]
    fn device_records_need_an_id() {
        let device = device_from_raw(json!({ "id": "emulator-1", "name": "Emulator" })).unwrap();
        assert_eq!(device.key.as_str(), "emulator-1");
        assert_eq!(device.metadata["name"], "Emulator");
        assert!(device_from_raw(json!({ "name": "nameless" })).is_err());
    }
}
