mod host;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wininfo_config::{ConfigLoad, ConfigSource, WinInfoConfig};
use wininfo_core::detect::CommandLocator;
use wininfo_core::service::InfoServiceDeps;
use wininfo_core::watch::NotifyWatchService;
use wininfo_core::{Category, InfoService};

use crate::host::{CommandDeviceProbe, RegQueryProbe, WindowsKitsProbe};

#[derive(Debug, Parser)]
#[command(
    name = "wininfo",
    about = "Detect Windows SDKs, Visual Studio installs and devices, and keep watching them"
)]
struct Cli {
    /// Config file (TOML or JSON). Overrides WININFO_CONFIG_PATH.
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Activate the service and log changes until interrupted (default)
    Run,
    /// Run one detection pass and print the snapshot as JSON
    Detect {
        #[arg(long)]
        pretty: bool,
        /// Wait up to this many milliseconds for the first device listing
        #[arg(long, value_name = "MS")]
        devices: Option<u64>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let ConfigLoad {
        mut config,
        source,
        warnings,
        env_file,
    } = WinInfoConfig::load_from_env_with(cli.config.as_deref())
        .context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Some(path) = env_file.as_ref() {
        info!(path = %path.display(), "loaded .env file");
    }
    match &source {
        ConfigSource::Default => info!("no config file found; using defaults"),
        ConfigSource::EnvPath(path) | ConfigSource::File(path) => {
            info!(path = %path.display(), "config loaded from file")
        }
        ConfigSource::EnvInline => info!("config loaded from inline environment json"),
    }
    for warning in &warnings {
        warn!(message = %warning, "configuration warning");
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Detect { pretty, devices } => {
            // One-shot: nothing should outlive the first pass.
            config.service.sdk.watch = false;
            config.service.ide.watch = false;
            detect(config, pretty, devices.map(Duration::from_millis)).await
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn build_service(config: &WinInfoConfig) -> InfoService {
    let mut deps = InfoServiceDeps::new(
        Arc::new(NotifyWatchService::new()),
        Arc::new(WindowsKitsProbe),
    );

    if config.service.sdk.registry {
        deps = deps.with_registry(Arc::new(RegQueryProbe::default()));
    }

    if config.service.ide.enabled {
        let ide = &config.service.ide;
        let locator = CommandLocator::new(ide.locator_program.clone(), ide.locator_args.clone())
            .with_watch_paths(config.host.locator_watch_paths.clone());
        deps = deps.with_ide_locator(Arc::new(locator));
    }

    if let Some(program) = config.host.device_command.as_ref() {
        deps = deps.with_device_probe(Arc::new(CommandDeviceProbe::new(
            program.clone(),
            config.host.device_args.clone(),
        )));
    }

    InfoService::new(config.service.clone(), deps)
}

async fn run(config: WinInfoConfig) -> anyhow::Result<()> {
    let service = build_service(&config);
    let store = service.store();
    let (observer, mut changes) = store.changes();

    service
        .activate()
        .await
        .context("failed to activate info service")?;
    let snapshot = service.snapshot();
    info!(
        sdks = snapshot.sdk.len(),
        ide_instances = snapshot.ide.len(),
        devices = snapshot.devices.len(),
        "initial detection complete"
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                info!("interrupt received; shutting down");
                break;
            }
            change = changes.recv() => {
                let Some(change) = change else { break };
                info!(
                    category = %change.category,
                    added = ?change.diff.added,
                    removed = ?change.diff.removed,
                    updated = ?change.diff.updated,
                    reordered = change.diff.reordered,
                    "store changed"
                );
            }
        }
    }

    store.unsubscribe(observer);
    service.deactivate().await;
    Ok(())
}

async fn detect(
    config: WinInfoConfig,
    pretty: bool,
    wait_for_devices: Option<Duration>,
) -> anyhow::Result<()> {
    let service = build_service(&config);
    let store = service.store();
    let (observer, mut changes) = store.changes();

    service
        .activate()
        .await
        .context("failed to activate info service")?;

    if let Some(limit) = wait_for_devices {
        let first_listing = async {
            while let Some(change) = changes.recv().await {
                if change.category == Category::Devices {
                    break;
                }
            }
        };
        if tokio::time::timeout(limit, first_listing).await.is_err() {
            warn!(timeout_ms = limit.as_millis() as u64, "no device listing before timeout");
        }
    }

    let snapshot = service.snapshot();
    store.unsubscribe(observer);
    service.deactivate().await;

    let rendered = if pretty {
        serde_json::to_string_pretty(&snapshot)?
    } else {
        serde_json::to_string(&snapshot)?
    };
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_run() {
        let cli = Cli::try_parse_from(["wininfo"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn config_flag_is_global() {
        let cli =
            Cli::try_parse_from(["wininfo", "detect", "--pretty", "-c", "kits.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("kits.toml")));
        assert!(matches!(
            cli.command,
            Some(Command::Detect {
                pretty: true,
                devices: None
            })
        ));
    }

    #[tokio::test]
    async fn detect_without_hosts_yields_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WinInfoConfig::default();
        config.service.sdk.directories = vec![dir.path().to_path_buf()];
        config.service.sdk.registry = false;
        config.service.sdk.watch = false;
        config.service.ide.enabled = false;

        let service = build_service(&config);
        service.activate().await.unwrap();
        let snapshot = service.snapshot();
        service.deactivate().await;

        assert!(snapshot.sdk.is_empty());
        assert!(snapshot.ide.is_empty());
        assert!(snapshot.devices.is_empty());
    }
}
