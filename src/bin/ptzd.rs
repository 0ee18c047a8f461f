//! PTZ Daemon - camera tracking sessions behind an HTTP/WebSocket API
//!
//! # Usage
//!
//! ```bash
//! # Start with the default config (~/.config/ptzd/config.toml if present)
//! ptzd
//!
//! # Explicit config file, bind address and backend
//! ptzd --config /etc/ptzd.toml --bind 0.0.0.0:8787 --backend onvif
//!
//! # Validate the configuration and exit
//! ptzd --check
//! ```

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ptz_backend::BackendKind;
use ptzd::config::DaemonConfig;
use ptzd::factory::ConfigSessionFactory;
use ptzd::registry::{spawn_manager, ManagerConfig};
use ptzd::server::DaemonServer;

/// Environment variable naming the config file
const CONFIG_ENV: &str = "PTZD_CONFIG";

/// PTZ tracking daemon
#[derive(Parser, Debug)]
#[command(name = "ptzd", version, about)]
struct Args {
    /// Config file (default: $PTZD_CONFIG, then <config dir>/ptzd/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.bind`
    #[arg(short, long)]
    bind: Option<String>,

    /// Default PTZ backend (simulated | onvif), overrides `backend.kind`
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

/// Resolves the config file. The flag is `true` when the user named it.
fn config_path(args: &Args) -> Option<(PathBuf, bool)> {
    if let Some(path) = &args.config {
        return Some((path.clone(), true));
    }
    if let Ok(path) = env::var(CONFIG_ENV) {
        return Some((PathBuf::from(path), true));
    }
    dirs::config_dir().map(|dir| (dir.join("ptzd").join("config.toml"), false))
}

fn load_config(args: &Args) -> Result<DaemonConfig> {
    let mut config = match config_path(args) {
        Some((path, true)) => DaemonConfig::load(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        Some((path, false)) => DaemonConfig::load_or_default(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => DaemonConfig::default(),
    };

    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(kind) = args.backend {
        config.backend.kind = kind;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ptzd=info".parse()?)
                .add_directive("ptz_core=info".parse()?)
                .add_directive("ptz_backend=info".parse()?)
                .add_directive("ptz_protocol=info".parse()?),
        )
        .init();

    let config = load_config(&args)?;
    if args.check {
        println!("Configuration OK");
        return Ok(());
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        bind = %config.server.bind,
        backend = %config.backend.kind,
        cameras = config.cameras.len(),
        "PTZ daemon starting"
    );

    let config = Arc::new(config);
    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let manager = spawn_manager(
        ManagerConfig::from_config(&config),
        Arc::new(ConfigSessionFactory::new(Arc::clone(&config))),
    );
    info!("Session manager started");

    let server = DaemonServer::new(
        config.server.bind.clone(),
        manager.clone(),
        config.ws_write_timeout(),
        cancel_token.clone(),
    );

    let result = server.run().await;
    cancel_token.cancel();
    manager.shutdown().await;

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("PTZ daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
