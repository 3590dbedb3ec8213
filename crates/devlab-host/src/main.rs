//! DevLab host daemon entry point.
//!
//! This binary keeps one lab host's Android devices usable from the rest
//! of the DevLab system: it tracks which devices are attached, mirrors
//! their display-type metadata, and serializes *intents* (asynchronous
//! device operations) so no device ever runs two at once.
//!
//! # Usage
//!
//! ```text
//! devlab-host [OPTIONS]
//!
//! Options:
//!   --config <PATH>        Explicit config file (bypasses the platform location)
//!   --adb-host <IP>        ADB server IP address
//!   --adb-port <PORT>      ADB server port
//!   --metadata-url <URL>   WebSocket URL of the display-type feed
//!   --no-metadata          Run without the display-type feed
//!   --log-level <LEVEL>    Log level when RUST_LOG is unset
//! ```
//!
//! # Configuration precedence
//!
//! CLI arguments override environment variables, which override the TOML
//! config file, which overrides built-in defaults.
//!
//! | Variable              | Config key         | Default                              |
//! |-----------------------|--------------------|--------------------------------------|
//! | `DEVLAB_CONFIG`       | (none)             | platform config dir / `host.toml`    |
//! | `DEVLAB_ADB_HOST`     | `tracker.adb_host` | `127.0.0.1`                          |
//! | `DEVLAB_ADB_PORT`     | `tracker.adb_port` | `5037`                               |
//! | `DEVLAB_METADATA_URL` | `metadata.url`     | `ws://127.0.0.1:8091/display-types`  |
//! | `DEVLAB_NO_METADATA`  | `metadata.enabled` | feed enabled                         |
//! | `DEVLAB_LOG_LEVEL`    | `host.log_level`   | `info`                               |
//!
//! # Architecture overview
//!
//! ```text
//! ADB server (host:track-devices)        metadata service (WebSocket)
//!       │ device list snapshots                │ display-type tables
//!       ▼                                      ▼
//! infrastructure/tracker ──events──▶ application/track_devices ◀── infrastructure/metadata
//!                                        │ registry (live set + display types)
//!                                        │ DeviceAdded notifications
//!                                        ▼
//!                             application/dispatch_intents
//!                                        │ per-device serialized intents
//!                                        ▼
//!                             infrastructure/gateway (adb shell)
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use devlab_core::DeviceId;
use devlab_host::application::dispatch_intents::{intent_fn, DeviceGateway, IntentDispatcher};
use devlab_host::application::track_devices::{
    run_event_pump, DeviceRegistry, RegistryNotification,
};
use devlab_host::infrastructure::gateway::adb::AdbGateway;
use devlab_host::infrastructure::metadata::ws::MetadataFeed;
use devlab_host::infrastructure::storage::config::{self, HostConfig};
use devlab_host::infrastructure::tracker::adb::AdbTracker;
use devlab_host::infrastructure::tracker::DeviceEventSource;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// DevLab host daemon.
///
/// Tracks the Android devices attached to this host via the local ADB
/// server and dispatches intents to them one at a time per device.
///
/// Every option is `Option<...>` on purpose: an absent flag means "defer
/// to the config file", which in turn defers to the built-in default.
#[derive(Debug, Parser)]
#[command(
    name = "devlab-host",
    about = "DevLab host daemon: device tracking and per-device intent dispatch",
    version
)]
struct Cli {
    /// Path to an explicit TOML config file.
    ///
    /// Without this flag the daemon reads the platform location, e.g.
    /// `~/.config/devlab/host.toml` on Linux. A missing platform file is
    /// fine; a missing explicit file is an error.
    #[arg(long, env = "DEVLAB_CONFIG")]
    config: Option<PathBuf>,

    /// IP address of the ADB server.
    #[arg(long, env = "DEVLAB_ADB_HOST")]
    adb_host: Option<String>,

    /// TCP port of the ADB server's smart socket.
    #[arg(long, env = "DEVLAB_ADB_PORT")]
    adb_port: Option<u16>,

    /// WebSocket URL of the display-type metadata feed.
    ///
    /// Giving a URL here enables the feed even when the config file
    /// disables it.
    #[arg(long, env = "DEVLAB_METADATA_URL")]
    metadata_url: Option<String>,

    /// Run without the display-type metadata feed.
    #[arg(long, env = "DEVLAB_NO_METADATA")]
    no_metadata: bool,

    /// Log level when `RUST_LOG` is unset: error, warn, info, debug, trace.
    #[arg(long, env = "DEVLAB_LOG_LEVEL")]
    log_level: Option<String>,
}

/// Effective settings after layering the CLI over the config file.
#[derive(Debug, Clone, PartialEq)]
struct HostSettings {
    /// Address of the ADB server, used by the tracker and the gateway.
    adb_addr: SocketAddr,
    /// Metadata feed URL; `None` means the feed is disabled.
    metadata_url: Option<String>,
    /// Fallback log level for when `RUST_LOG` is unset.
    log_level: String,
}

impl Cli {
    /// Merges the CLI arguments over `file` into the effective settings.
    ///
    /// # Errors
    ///
    /// Returns an error when the ADB host/port pair does not form a valid
    /// socket address.
    fn into_settings(self, file: HostConfig) -> anyhow::Result<HostSettings> {
        let adb_host = self.adb_host.unwrap_or(file.tracker.adb_host);
        let adb_port = self.adb_port.unwrap_or(file.tracker.adb_port);
        let adb_addr: SocketAddr = format!("{}:{}", adb_host, adb_port)
            .parse()
            .with_context(|| format!("invalid ADB server address: '{}:{}'", adb_host, adb_port))?;

        // --no-metadata wins over everything; an explicit --metadata-url
        // re-enables a feed the file disabled.
        let metadata_url = if self.no_metadata {
            None
        } else if let Some(url) = self.metadata_url {
            Some(url)
        } else if file.metadata.enabled {
            Some(file.metadata.url)
        } else {
            None
        };

        let log_level = self.log_level.unwrap_or(file.host.log_level);

        Ok(HostSettings {
            adb_addr,
            metadata_url,
            log_level,
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed and the TOML config file is loaded; the
///    two are merged into [`HostSettings`].
/// 2. `tracing_subscriber` is initialised. `RUST_LOG` wins; otherwise
///    the configured log level applies.
/// 3. The registry, the ADB gateway and the dispatcher are constructed.
/// 4. The device tracker subscribes to the ADB server. Failure here is
///    fatal: a host that cannot see its devices has no reason to run.
/// 5. The event pump, the metadata feed and the arrival listener start
///    on their own tasks.
/// 6. The daemon then parks until Ctrl+C.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file_config = match &cli.config {
        Some(path) => config::load_config_from(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?,
        None => config::load_config().context("cannot read platform config file")?,
    };
    let settings = cli.into_settings(file_config)?;

    // `RUST_LOG` takes precedence over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone())),
        )
        .init();

    info!("DevLab host starting, adb server at {}", settings.adb_addr);

    let registry = Arc::new(DeviceRegistry::new());
    let gateway = Arc::new(AdbGateway::new(settings.adb_addr));
    let dispatcher = Arc::new(IntentDispatcher::new(Arc::clone(&registry), gateway));

    // Tracking is the daemon's eyes; refusal to subscribe is fatal.
    let tracker = AdbTracker::new(settings.adb_addr);
    let events = tracker
        .start()
        .await
        .context("cannot subscribe to ADB device tracking")?;
    info!("tracking devices via {}", settings.adb_addr);

    {
        let registry = Arc::clone(&registry);
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(run_event_pump(events, registry, dispatcher));
    }

    // The metadata feed is optional; devices just have no display type
    // without it.
    match settings.metadata_url {
        Some(url) => {
            info!("display-type feed: {}", url);
            let feed = MetadataFeed::new(url, Arc::clone(&registry));
            tokio::spawn(feed.run());
        }
        None => info!("display-type feed disabled"),
    }

    spawn_arrival_listener(Arc::clone(&registry), Arc::clone(&dispatcher));

    info!("DevLab host ready; press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("DevLab host stopped");
    Ok(())
}

/// Greets every arriving device: logs what the lab knows about it and
/// dispatches a probe intent for its model name.
///
/// The probe goes through the dispatcher like any other intent, so a
/// device that arrives mid-operation is probed only once it is free.
fn spawn_arrival_listener(registry: Arc<DeviceRegistry>, dispatcher: Arc<IntentDispatcher>) {
    let mut notifications = registry.subscribe();
    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(RegistryNotification::DeviceAdded(id)) => {
                    let display_type = registry
                        .display_type(&id)
                        .unwrap_or_else(|| "none".to_string());
                    info!("device online: {} (display type: {})", id, display_type);
                    dispatcher.dispatch_one(Arc::new(intent_fn(probe_device)), &id);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("arrival listener lagged, missed {} notifications", missed);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}

/// Probe intent: asks the device for its model name and logs it.
async fn probe_device(
    gateway: Arc<dyn DeviceGateway>,
    device_id: DeviceId,
) -> anyhow::Result<()> {
    let output = gateway
        .shell(&device_id, "getprop ro.product.model")
        .await?;
    let model = String::from_utf8_lossy(&output);
    info!("device {} reports model: {}", device_id, model.trim());
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_cli() -> Cli {
        Cli {
            config: None,
            adb_host: None,
            adb_port: None,
            metadata_url: None,
            no_metadata: false,
            log_level: None,
        }
    }

    // ── Argument parsing ──────────────────────────────────────────────────────

    #[test]
    fn test_cli_defaults_leave_everything_unset() {
        // Arrange: parse with no arguments
        let cli = Cli::parse_from(["devlab-host"]);

        // Assert: nothing overrides the config file
        assert!(cli.config.is_none());
        assert!(cli.adb_host.is_none());
        assert!(cli.adb_port.is_none());
        assert!(cli.metadata_url.is_none());
        assert!(!cli.no_metadata);
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn test_cli_adb_host_override() {
        let cli = Cli::parse_from(["devlab-host", "--adb-host", "10.0.0.5"]);
        assert_eq!(cli.adb_host.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn test_cli_adb_port_override() {
        let cli = Cli::parse_from(["devlab-host", "--adb-port", "5555"]);
        assert_eq!(cli.adb_port, Some(5555));
    }

    #[test]
    fn test_cli_metadata_url_override() {
        let cli = Cli::parse_from(["devlab-host", "--metadata-url", "ws://lab:9000/feed"]);
        assert_eq!(cli.metadata_url.as_deref(), Some("ws://lab:9000/feed"));
    }

    #[test]
    fn test_cli_no_metadata_flag() {
        let cli = Cli::parse_from(["devlab-host", "--no-metadata"]);
        assert!(cli.no_metadata);
    }

    #[test]
    fn test_cli_config_path_override() {
        let cli = Cli::parse_from(["devlab-host", "--config", "/tmp/custom.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/custom.toml")));
    }

    // ── Settings merge ────────────────────────────────────────────────────────

    #[test]
    fn test_settings_default_to_local_adb() {
        // Arrange / Act
        let settings = bare_cli().into_settings(HostConfig::default()).unwrap();

        // Assert
        assert_eq!(settings.adb_addr.to_string(), "127.0.0.1:5037");
    }

    #[test]
    fn test_settings_cli_beats_config_file() {
        let mut file = HostConfig::default();
        file.tracker.adb_host = "10.0.0.1".to_string();
        file.tracker.adb_port = 6000;

        let mut cli = bare_cli();
        cli.adb_port = Some(7000);
        let settings = cli.into_settings(file).unwrap();

        // Port from the CLI, host from the file.
        assert_eq!(settings.adb_addr.to_string(), "10.0.0.1:7000");
    }

    #[test]
    fn test_settings_metadata_enabled_by_default() {
        let settings = bare_cli().into_settings(HostConfig::default()).unwrap();
        assert_eq!(
            settings.metadata_url.as_deref(),
            Some("ws://127.0.0.1:8091/display-types")
        );
    }

    #[test]
    fn test_settings_no_metadata_flag_disables_feed() {
        let mut cli = bare_cli();
        cli.no_metadata = true;
        let settings = cli.into_settings(HostConfig::default()).unwrap();
        assert_eq!(settings.metadata_url, None);
    }

    #[test]
    fn test_settings_no_metadata_beats_explicit_url() {
        let mut cli = bare_cli();
        cli.no_metadata = true;
        cli.metadata_url = Some("ws://lab:9000/feed".to_string());
        let settings = cli.into_settings(HostConfig::default()).unwrap();
        assert_eq!(settings.metadata_url, None);
    }

    #[test]
    fn test_settings_cli_url_reenables_disabled_feed() {
        // Arrange: the file disables the feed but the CLI names a URL.
        let mut file = HostConfig::default();
        file.metadata.enabled = false;

        let mut cli = bare_cli();
        cli.metadata_url = Some("ws://lab:9000/feed".to_string());

        // Act
        let settings = cli.into_settings(file).unwrap();

        // Assert
        assert_eq!(settings.metadata_url.as_deref(), Some("ws://lab:9000/feed"));
    }

    #[test]
    fn test_settings_file_can_disable_feed() {
        let mut file = HostConfig::default();
        file.metadata.enabled = false;

        let settings = bare_cli().into_settings(file).unwrap();

        assert_eq!(settings.metadata_url, None);
    }

    #[test]
    fn test_settings_log_level_prefers_cli() {
        let mut file = HostConfig::default();
        file.host.log_level = "debug".to_string();

        let mut cli = bare_cli();
        cli.log_level = Some("trace".to_string());
        let settings = cli.into_settings(file).unwrap();

        assert_eq!(settings.log_level, "trace");
    }

    #[test]
    fn test_settings_log_level_falls_back_to_file() {
        let mut file = HostConfig::default();
        file.host.log_level = "debug".to_string();

        let settings = bare_cli().into_settings(file).unwrap();

        assert_eq!(settings.log_level, "debug");
    }

    #[test]
    fn test_settings_invalid_adb_host_returns_error() {
        // Arrange: a hostname is not a socket address
        let mut cli = bare_cli();
        cli.adb_host = Some("not.an.ip".to_string());

        // Act
        let result = cli.into_settings(HostConfig::default());

        // Assert: must return an error, not panic
        assert!(result.is_err());
    }
}
