//! Beacon daemon
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - BEACON_CONFIG: Configuration file, JSON or YAML (default: beacon.json if present)
//! - BEACON_GRAPHITE_URL: Overrides `graphite_url`
//! - BEACON_PIDFILE: Overrides `pidfile`
//! - RUST_LOG: Log filter (default: beacon=<logging option>)
//!
//! SIGINT and SIGTERM stop the daemon, SIGHUP reloads the configuration.

use std::path::{Path, PathBuf};

use beacon::config::{self, ConfigError, Options};
use beacon::reactor::Reactor;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG: &str = "beacon.json";

fn config_path() -> Option<PathBuf> {
    match std::env::var("BEACON_CONFIG") {
        Ok(path) => Some(PathBuf::from(path)),
        Err(_) => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            default.exists().then_some(default)
        }
    }
}

fn read_options(path: Option<&Path>) -> Result<Options, ConfigError> {
    let mut options = match path {
        Some(path) => config::load(path)?,
        None => Options::default(),
    };

    if let Ok(url) = std::env::var("BEACON_GRAPHITE_URL") {
        options.graphite_url = url;
    }
    if let Ok(pidfile) = std::env::var("BEACON_PIDFILE") {
        options.pidfile = Some(PathBuf::from(pidfile));
    }
    Ok(options)
}

fn reload(reactor: &Reactor, path: Option<&Path>) {
    tracing::info!("Reloading configuration");
    match read_options(path) {
        Ok(options) => match reactor.reinit(options) {
            Ok(alerts) => tracing::info!(alerts, "Configuration reloaded"),
            Err(e) => tracing::error!(error = %e, "Reload rejected"),
        },
        Err(e) => tracing::error!(error = %e, "Failed to read configuration"),
    }
}

#[cfg(unix)]
async fn wait_for_signals(reactor: &Reactor, path: Option<&Path>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = terminate.recv() => break,
            _ = hangup.recv() => reload(reactor, path),
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signals(_reactor: &Reactor, _path: Option<&Path>) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path();
    let options = read_options(path.as_deref());

    let logging = options
        .as_ref()
        .map(|o| o.logging.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("beacon={logging}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let options = options?;
    tracing::info!("Beacon configuration:");
    match &path {
        Some(path) => tracing::info!("  Config: {}", path.display()),
        None => tracing::info!("  Config: defaults"),
    }
    tracing::info!("  Graphite: {}", options.graphite_url);
    tracing::info!("  Alerts: {}", options.alerts.len());
    tracing::info!("  Repeat interval: {}", options.repeat_interval);
    if options.debug {
        tracing::info!("  Debug mode: polling every alert every 5 seconds");
    }

    let reactor = Reactor::new(options)?;
    reactor.start()?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Beacon started");

    wait_for_signals(&reactor, path.as_deref()).await?;

    reactor.stop().await;
    tracing::info!("Beacon stopped");
    Ok(())
}
