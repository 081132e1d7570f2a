mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libcsi::backend::nfs::mount::ensure_local_mount;
use libcsi::backend::nfs::{DriverConfig, NfsController, NfsIdentity, NfsNode};
use libcsi::{CsiServer, ServerHandle, Services};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.log_format)?;

    let debug = cli.debug;
    let config = Arc::new(cli.into_config());
    config.log_summary();

    let services = build_services(&config).await?;
    let handle = CsiServer::new(services)
        .with_debug(debug)
        .start(&config.endpoint)
        .await
        .with_context(|| format!("failed to serve CSI on {}", config.endpoint))?;

    tokio::spawn(shutdown_on_signal(handle.clone()));
    handle.wait().await;
    info!(state = ?handle.state(), "csi-nfs exited");
    Ok(())
}

fn init_logging(debug: bool, format: LogFormat) -> Result<()> {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("failed to create log filter")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

async fn build_services(config: &Arc<DriverConfig>) -> Result<Services> {
    let mut services = Services::new();
    if config.enable_identity {
        services = services.with_identity(Arc::new(NfsIdentity::new(Arc::clone(config))));
    }
    if config.enable_controller {
        ensure_local_mount(config)
            .await
            .context("failed to prepare local NFS mount")?;
        services = services.with_controller(Arc::new(NfsController::from_config(Arc::clone(config))));
    }
    if config.enable_node {
        services = services.with_node(Arc::new(NfsNode::new(Arc::clone(config))));
    }
    if services.is_empty() {
        warn!("no service enabled, every call will answer UNIMPLEMENTED");
    }
    Ok(services)
}

/// First SIGINT/SIGTERM drains, the second one kills.
async fn shutdown_on_signal(handle: ServerHandle) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            return;
        }
    };

    let mut requested = false;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for SIGINT");
                    return;
                }
            }
            _ = terminate.recv() => {}
        }

        if requested {
            warn!("second shutdown signal, aborting in-flight calls");
            handle.force_stop();
            return;
        }
        info!("shutdown signal received, draining in-flight calls");
        handle.stop();
        requested = true;
    }
}
