//! nfsvold - NFS volume plugin daemon.
//!
//! Serves the Docker volume plugin protocol over a unix socket (or TCP) and
//! drains every volume on shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use nfsvol::{Driver, DriverConfig, NfsMounter};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod api;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory volumes are mounted under
    #[arg(long, env = "NFSVOL_ROOT")]
    mount_root: Option<PathBuf>,

    /// Unix socket to serve the plugin API on
    #[arg(long, env = "NFSVOL_SOCKET", default_value = "/run/docker/plugins/nfsvol.sock")]
    socket: PathBuf,

    /// Serve on this TCP address instead of the unix socket
    #[arg(long, env = "NFSVOL_LISTEN_ADDR")]
    listen_addr: Option<SocketAddr>,

    /// Warn about mounts taking longer than this many seconds
    #[arg(long, env = "NFSVOL_SLOW_MOUNT_THRESHOLD_SECS", default_value_t = 8)]
    slow_mount_threshold_secs: u64,

    /// Mount helper used to mount NFS exports
    #[arg(long, env = "NFSVOL_MOUNT_COMMAND", default_value = "mount")]
    mount_command: PathBuf,

    /// Enable debug logging
    #[arg(long, env = "NFSVOL_DEBUG")]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long, env = "NFSVOL_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(args.log_json.then(|| fmt::layer().json()))
        .with((!args.log_json).then(|| fmt::layer().with_target(true)))
        .with(
            EnvFilter::from_default_env()
                .add_directive(format!("nfsvol={level}").parse()?)
                .add_directive(format!("nfsvold={level}").parse()?),
        )
        .init();

    let mut config = DriverConfig::default()
        .with_slow_mount_threshold(Duration::from_secs(args.slow_mount_threshold_secs));
    if let Some(root) = &args.mount_root {
        config = config.with_root(root);
    }

    let mounter = NfsMounter::new().with_command(&args.mount_command);
    let driver = Arc::new(
        Driver::new(config, Arc::new(mounter))
            .await
            .wrap_err("failed to start volume driver")?,
    );

    let app = api::server::app(driver.clone());

    if let Some(addr) = args.listen_addr {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .wrap_err_with(|| format!("failed to bind {addr}"))?;
        tracing::info!(%addr, "nfsvold listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        if let Some(parent) = args.socket.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // A previous instance may have left its socket behind.
        match std::fs::remove_file(&args.socket) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        let listener = tokio::net::UnixListener::bind(&args.socket)
            .wrap_err_with(|| format!("failed to bind {}", args.socket.display()))?;
        tracing::info!(socket = %args.socket.display(), "nfsvold listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        if let Err(e) = std::fs::remove_file(&args.socket) {
            tracing::warn!(socket = %args.socket.display(), error = %e, "Failed to remove socket");
        }
    }

    driver.drain().await;
    tracing::info!("nfsvold stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown requested, draining volumes");
}
