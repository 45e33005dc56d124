//! Configuration library for wininfo.
//!
//! Loads the service configuration from a file or environment variables,
//! applies environment overrides and reports guard-rail warnings. The
//! `wininfo` binary re-exports these so there is a single source of truth for
//! config defaults.

pub mod models;
pub mod util;
pub mod validation;

pub use models::{
    ConfigLoad, ConfigSource, HostConfig, LoggingConfig, WinInfoConfig,
};
pub use validation::{ConfigWarning, ConfigWarnings};
pub use wininfo_core::service::InfoServiceConfig;
