mod config;

use clap::Parser;
use ingest_als::config::{Config, TlsConfig};
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Ingestion endpoint for batches of Envoy access-log entries.
#[derive(Parser)]
#[command(name = "arblog")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut cfg = match &cli.config {
        Some(path) => match config::from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!("{e}");
                process::exit(1);
            }
        },
        None => Config::default(),
    };

    // A mounted secret dir in the environment overrides any configured TLS
    // section.
    if let Ok(dir) = std::env::var("ARB_TLS")
        && !dir.is_empty()
    {
        cfg.tls = Some(TlsConfig::from_secret_dir(dir));
    }

    if let Err(e) = cfg.validate() {
        tracing::error!("invalid config: {e}");
        process::exit(1);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // First interrupt starts a graceful shutdown, a second one forces the
    // issue.
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
        if signal::ctrl_c().await.is_ok() {
            tracing::warn!("second interrupt, exiting immediately");
            process::exit(1);
        }
    });

    if let Err(e) = ingest_als::run(cfg, shutdown_rx).await {
        tracing::error!("finished with error: {e}");
        process::exit(1);
    }
}
