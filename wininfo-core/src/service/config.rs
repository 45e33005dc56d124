use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Knobs for the info service.
///
/// All fields carry defaults so a partial config file only needs to name
/// what it overrides.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct InfoServiceConfig {
    /// Windows SDK detection roots and re-detection behaviour.
    pub sdk: SdkDetectConfig,
    /// Visual Studio discovery through the external locator.
    pub ide: IdeDetectConfig,
    /// Connected-device polling.
    pub devices: DeviceConfig,
    /// Filesystem watch debouncing.
    pub watch: WatchConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SdkDetectConfig {
    /// Roots probed on every pass, ahead of registry-derived roots.
    pub directories: Vec<PathBuf>,
    /// Directory levels below each root that may be probed.
    pub depth: usize,
    /// Report every SDK found rather than stopping at the first.
    pub multiple: bool,
    /// Consult the registry for additional install roots.
    pub registry: bool,
    /// Watch the roots and every detected SDK.
    pub watch: bool,
    /// Re-detect when a watched path changes.
    pub redetect: bool,
    /// Optional fixed re-detection cadence on top of watches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    /// Optional upper bound for probing a single root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_timeout_ms: Option<u64>,
}

impl Default for SdkDetectConfig {
    fn default() -> Self {
        Self {
            directories: vec![PathBuf::from(r"C:\Program Files (x86)\Windows Kits")],
            depth: 1,
            multiple: true,
            registry: true,
            watch: true,
            redetect: true,
            poll_interval_ms: None,
            probe_timeout_ms: None,
        }
    }
}

impl SdkDetectConfig {
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms
            .map(|ms| Duration::from_millis(ms.max(1)))
    }

    pub fn probe_timeout(&self) -> Option<Duration> {
        self.probe_timeout_ms
            .map(|ms| Duration::from_millis(ms.max(1)))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdeDetectConfig {
    pub enabled: bool,
    /// Parent directories that release folders (e.g. `2019`, `2022`) are
    /// installed under. Watched even when absent so a first install is seen.
    pub install_roots: Vec<PathBuf>,
    /// Locator executable queried for installed instances.
    pub locator_program: PathBuf,
    pub locator_args: Vec<String>,
    /// Establish install-root, locator and per-instance watches.
    pub watch: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
}

impl Default for IdeDetectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            install_roots: vec![PathBuf::from(r"C:\Program Files (x86)\Microsoft Visual Studio")],
            locator_program: PathBuf::from(
                r"C:\Program Files (x86)\Microsoft Visual Studio\Installer\vswhere.exe",
            ),
            locator_args: ["-all", "-prerelease", "-format", "json", "-utf8"]
                .into_iter()
                .map(String::from)
                .collect(),
            watch: true,
            poll_interval_ms: None,
        }
    }
}

impl IdeDetectConfig {
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms
            .map(|ms| Duration::from_millis(ms.max(1)))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub enabled: bool,
    /// Rescan cadence while an SDK is present.
    pub poll_interval_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 2_500,
        }
    }
}

impl DeviceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Tuning controls for filesystem watch coalescing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchConfig {
    /// Debounce window in milliseconds.
    pub debounce_window_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: 250,
        }
    }
}

impl WatchConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms.max(1))
    }
}
