//! dropsync: replicate new files in a drop folder to a peer node.
//!
//! Both nodes run this binary with their addresses swapped; each one
//! listens for the peer and dials it.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dropsync_daemon::{Args, Node};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("debug,dropsync=debug,dropsync_daemon=debug,dropsync_core=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,dropsync=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.into_config();
    info!("Starting dropsync node {}", config.name);

    let node = Node::bind(config).await.context("Failed to start node")?;
    node.run(shutdown_signal()).await?;

    info!("dropsync shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
