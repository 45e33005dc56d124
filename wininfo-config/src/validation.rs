use std::fmt;

use thiserror::Error;
use wininfo_core::service::InfoServiceConfig;

/// A setting that is accepted but probably not what the operator meant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigWarning {
    #[error("{field} is 0; clamped to 1 ms")]
    ZeroInterval { field: &'static str },
    #[error(
        "no SDK directories configured and registry lookup disabled; \
         SDK detection will find nothing"
    )]
    NoSdkRoots,
    #[error("sdk.redetect is set but sdk.watch is off; changes will only be seen by polling")]
    RedetectWithoutWatch,
    #[error("ignoring {name}={value}: {reason}")]
    InvalidOverride {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigWarnings(Vec<ConfigWarning>);

impl ConfigWarnings {
    pub fn push(&mut self, warning: ConfigWarning) {
        self.0.push(warning);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConfigWarning> {
        self.0.iter()
    }

    pub fn contains(&self, warning: &ConfigWarning) -> bool {
        self.0.contains(warning)
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.0.extend(other.0);
    }
}

impl fmt::Display for ConfigWarnings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, warning) in self.0.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "- {warning}")?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ConfigWarnings {
    type Item = &'a ConfigWarning;
    type IntoIter = std::slice::Iter<'a, ConfigWarning>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Guard-rail checks over a fully merged service config.
pub fn check_service(config: &InfoServiceConfig) -> ConfigWarnings {
    let mut warnings = ConfigWarnings::default();

    if config.watch.debounce_window_ms == 0 {
        warnings.push(ConfigWarning::ZeroInterval {
            field: "watch.debounce_window_ms",
        });
    }
    if config.devices.poll_interval_ms == 0 {
        warnings.push(ConfigWarning::ZeroInterval {
            field: "devices.poll_interval_ms",
        });
    }
    if config.sdk.poll_interval_ms == Some(0) {
        warnings.push(ConfigWarning::ZeroInterval {
            field: "sdk.poll_interval_ms",
        });
    }
    if config.ide.poll_interval_ms == Some(0) {
        warnings.push(ConfigWarning::ZeroInterval {
            field: "ide.poll_interval_ms",
        });
    }
    if config.sdk.probe_timeout_ms == Some(0) {
        warnings.push(ConfigWarning::ZeroInterval {
            field: "sdk.probe_timeout_ms",
        });
    }
    if config.sdk.directories.is_empty() && !config.sdk.registry {
        warnings.push(ConfigWarning::NoSdkRoots);
    }
    if config.sdk.redetect && !config.sdk.watch && config.sdk.poll_interval_ms.is_none() {
        warnings.push(ConfigWarning::RedetectWithoutWatch);
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_clean() {
        assert!(check_service(&InfoServiceConfig::default()).is_empty());
    }

    #[test]
    fn flags_zero_debounce_and_missing_roots() {
        let mut config = InfoServiceConfig::default();
        config.watch.debounce_window_ms = 0;
        config.sdk.directories.clear();
        config.sdk.registry = false;

        let warnings = check_service(&config);
        assert_eq!(warnings.len(), 2);
        assert!(warnings.contains(&ConfigWarning::ZeroInterval {
            field: "watch.debounce_window_ms"
        }));
        assert!(warnings.contains(&ConfigWarning::NoSdkRoots));
        assert!(warnings.to_string().contains("clamped"));
    }

    #[test]
    fn flags_zero_probe_timeout() {
        let mut config = InfoServiceConfig::default();
        config.sdk.probe_timeout_ms = Some(0);

        let warnings = check_service(&config);
        assert_eq!(warnings.len(), 1);
        assert!(warnings.contains(&ConfigWarning::ZeroInterval {
            field: "sdk.probe_timeout_ms"
        }));
    }
}
