use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use wininfo_core::service::InfoServiceConfig;

use crate::util::{parse_bool, parse_csv, parse_millis};
use crate::validation::{ConfigWarning, ConfigWarnings, check_service};

pub const CONFIG_PATH_VAR: &str = "WININFO_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "WININFO_CONFIG_JSON";
pub const DEBOUNCE_VAR: &str = "WININFO_DEBOUNCE_MS";
pub const DEVICE_POLL_VAR: &str = "WININFO_DEVICE_POLL_MS";
pub const SDK_DIRS_VAR: &str = "WININFO_SDK_DIRS";
pub const WATCH_VAR: &str = "WININFO_WATCH";

const DEFAULT_FILES: &[&str] = &[
    "wininfo.toml",
    "wininfo.json",
    "config/wininfo.toml",
    "config/wininfo.json",
];

/// Source that produced the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Settings for the host adapters wired up by the binary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Program that prints connected devices as a JSON array. Device polling
    /// is disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_command: Option<PathBuf>,
    pub device_args: Vec<String>,
    /// Extra paths whose changes should re-run the Visual Studio locator.
    pub locator_watch_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,wininfo_core=info".to_string(),
        }
    }
}

/// Everything the `wininfo` binary needs: the service config plus host
/// adapter and logging settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WinInfoConfig {
    #[serde(flatten)]
    pub service: InfoServiceConfig,
    pub host: HostConfig,
    pub logging: LoggingConfig,
}

/// Result of loading: the merged config, where it came from and anything
/// suspicious about it. Nothing is logged during loading; callers report
/// `warnings` once logging is up.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: WinInfoConfig,
    pub source: ConfigSource,
    pub warnings: ConfigWarnings,
    /// The `.env` file that was applied, if any.
    pub env_file: Option<PathBuf>,
}

impl WinInfoConfig {
    /// Load configuration from the process environment.
    ///
    /// `.env` in the working directory is read first. Evaluation order:
    /// 1) `$WININFO_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$WININFO_CONFIG_JSON` (inline JSON),
    /// 3) the first existing default file,
    /// 4) defaults.
    ///
    /// Scalar environment overrides are applied on top of whichever source
    /// won.
    pub fn load_from_env() -> anyhow::Result<ConfigLoad> {
        Self::load_from_env_with(None)
    }

    /// [`WinInfoConfig::load_from_env`], with `config_path` (typically a CLI
    /// flag) taking the place of `$WININFO_CONFIG_PATH` when given.
    pub fn load_from_env_with(config_path: Option<&Path>) -> anyhow::Result<ConfigLoad> {
        let env_file = match dotenvy::dotenv() {
            Ok(path) => Some(path),
            Err(err) if err.not_found() => None,
            Err(err) => return Err(err).context("failed to read .env"),
        };

        let cwd = env::current_dir().context("failed to resolve working directory")?;
        let lookup = |name: &str| match config_path {
            Some(path) if name == CONFIG_PATH_VAR => Some(path.display().to_string()),
            _ => env::var(name).ok(),
        };
        let mut load = Self::load_with(lookup, &cwd)?;
        load.env_file = env_file;
        Ok(load)
    }

    /// Same as [`WinInfoConfig::load_from_env`] with an explicit variable
    /// lookup and base directory for relative paths and default files.
    pub fn load_with<F>(lookup: F, base_dir: &Path) -> anyhow::Result<ConfigLoad>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|raw| !raw.trim().is_empty());

        let (mut config, source) = if let Some(raw) = non_empty(CONFIG_PATH_VAR) {
            let path = resolve(base_dir, Path::new(raw.trim()));
            let config = Self::load_from_file(&path)?;
            (config, ConfigSource::EnvPath(path))
        } else if let Some(raw) = non_empty(CONFIG_JSON_VAR) {
            let config = Self::parse_json(&raw).context("failed to parse WININFO_CONFIG_JSON")?;
            (config, ConfigSource::EnvInline)
        } else if let Some(path) = Self::find_default_file(base_dir) {
            let config = Self::load_from_file(&path)?;
            (config, ConfigSource::File(path))
        } else {
            (Self::default(), ConfigSource::Default)
        };

        let mut warnings = config.apply_overrides(&lookup);
        warnings.extend(check_service(&config.service));

        Ok(ConfigLoad {
            config,
            source,
            warnings,
            env_file: None,
        })
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid config {}", path.display())),
            Some("toml") => toml::from_str(&contents)
                .map_err(|err| anyhow!("invalid config {}: {}", path.display(), err)),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        // Try TOML first, then JSON.
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid config json: {err}"))
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("failed to render config as TOML")
    }

    fn find_default_file(base_dir: &Path) -> Option<PathBuf> {
        DEFAULT_FILES
            .iter()
            .map(|candidate| base_dir.join(candidate))
            .find(|path| path.is_file())
    }

    /// Apply scalar environment overrides. Unparseable values are skipped
    /// and reported.
    fn apply_overrides<F>(&mut self, lookup: &F) -> ConfigWarnings
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = ConfigWarnings::default();
        let service = &mut self.service;

        if let Some(raw) = lookup(DEBOUNCE_VAR) {
            match parse_millis(&raw) {
                Some(ms) => service.watch.debounce_window_ms = ms,
                None => warnings.push(invalid(DEBOUNCE_VAR, raw, "expected milliseconds")),
            }
        }

        if let Some(raw) = lookup(DEVICE_POLL_VAR) {
            match parse_millis(&raw) {
                Some(ms) => service.devices.poll_interval_ms = ms,
                None => warnings.push(invalid(DEVICE_POLL_VAR, raw, "expected milliseconds")),
            }
        }

        if let Some(raw) = lookup(SDK_DIRS_VAR) {
            service.sdk.directories = parse_csv(&raw).into_iter().map(PathBuf::from).collect();
        }

        if let Some(raw) = lookup(WATCH_VAR) {
            match parse_bool(&raw) {
                Some(watch) => {
                    service.sdk.watch = watch;
                    service.ide.watch = watch;
                }
                None => warnings.push(invalid(WATCH_VAR, raw, "expected a boolean")),
            }
        }

        warnings
    }
}

fn invalid(name: &'static str, value: String, reason: &'static str) -> ConfigWarning {
    ConfigWarning::InvalidOverride {
        name,
        value,
        reason,
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
