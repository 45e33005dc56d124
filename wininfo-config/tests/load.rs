use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use wininfo_config::{ConfigSource, ConfigWarning, WinInfoConfig};

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let env = vars(&[]);

    let load = WinInfoConfig::load_with(|name| env.get(name).cloned(), dir.path()).unwrap();

    assert_eq!(load.source, ConfigSource::Default);
    assert_eq!(load.config, WinInfoConfig::default());
    assert!(load.warnings.is_empty());
}

#[test]
fn default_file_is_discovered() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("config")).unwrap();
    fs::write(
        dir.path().join("config/wininfo.toml"),
        "[devices]\npoll_interval_ms = 5000\n",
    )
    .unwrap();
    let env = vars(&[]);

    let load = WinInfoConfig::load_with(|name| env.get(name).cloned(), dir.path()).unwrap();

    assert_eq!(
        load.source,
        ConfigSource::File(dir.path().join("config/wininfo.toml"))
    );
    assert_eq!(load.config.service.devices.poll_interval_ms, 5000);
}

#[test]
fn env_path_wins_over_inline_and_default_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("wininfo.toml"), "[sdk]\ndepth = 3\n").unwrap();
    fs::write(dir.path().join("custom.json"), r#"{ "sdk": { "depth": 5 } }"#).unwrap();
    let env = vars(&[
        ("WININFO_CONFIG_PATH", "custom.json"),
        ("WININFO_CONFIG_JSON", r#"{ "sdk": { "depth": 7 } }"#),
    ]);

    let load = WinInfoConfig::load_with(|name| env.get(name).cloned(), dir.path()).unwrap();

    assert_eq!(load.source, ConfigSource::EnvPath(dir.path().join("custom.json")));
    assert_eq!(load.config.service.sdk.depth, 5);
}

#[test]
fn inline_json_is_used_when_no_path() {
    let dir = tempfile::tempdir().unwrap();
    let env = vars(&[(
        "WININFO_CONFIG_JSON",
        r#"{ "ide": { "enabled": false }, "logging": { "filter": "debug" } }"#,
    )]);

    let load = WinInfoConfig::load_with(|name| env.get(name).cloned(), dir.path()).unwrap();

    assert_eq!(load.source, ConfigSource::EnvInline);
    assert!(!load.config.service.ide.enabled);
    assert_eq!(load.config.logging.filter, "debug");
}

#[test]
fn scalar_overrides_apply_on_top_of_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("wininfo.toml"),
        "[watch]\ndebounce_window_ms = 400\n",
    )
    .unwrap();
    let env = vars(&[
        ("WININFO_DEBOUNCE_MS", "100"),
        ("WININFO_DEVICE_POLL_MS", "750"),
        ("WININFO_SDK_DIRS", r"D:\Kits, E:\Kits"),
        ("WININFO_WATCH", "false"),
    ]);

    let load = WinInfoConfig::load_with(|name| env.get(name).cloned(), dir.path()).unwrap();
    let service = &load.config.service;

    assert_eq!(service.watch.debounce_window_ms, 100);
    assert_eq!(service.devices.poll_interval_ms, 750);
    assert_eq!(
        service.sdk.directories,
        vec![PathBuf::from(r"D:\Kits"), PathBuf::from(r"E:\Kits")]
    );
    assert!(!service.sdk.watch);
    // redetect stays on with watching disabled and no poll timer
    assert!(load.warnings.contains(&ConfigWarning::RedetectWithoutWatch));
}

#[test]
fn zero_debounce_is_a_warning_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let env = vars(&[("WININFO_DEBOUNCE_MS", "0")]);

    let load = WinInfoConfig::load_with(|name| env.get(name).cloned(), dir.path()).unwrap();

    assert_eq!(load.config.service.watch.debounce_window_ms, 0);
    assert!(load.warnings.contains(&ConfigWarning::ZeroInterval {
        field: "watch.debounce_window_ms"
    }));
}

#[test]
fn malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("wininfo.json"), "{ not json").unwrap();
    let env = vars(&[]);

    let err = WinInfoConfig::load_with(|name| env.get(name).cloned(), dir.path()).unwrap_err();
    assert!(err.to_string().contains("wininfo.json"));
}
