//! Ingestion endpoint for batches of Envoy access-log entries.
//!
//! Accepts a JSON array of jsonpb-encoded `HTTPAccessLogEntry` records,
//! classifies each entry (accepted, rate-limited, or rejected for unknown
//! reasons), logs one summary line per entry, and answers with a synthetic
//! status selected by the outer request's path.

pub mod accesslog;
pub mod batch;
pub mod classify;
pub mod config;
pub mod errors;
pub mod server;
pub mod service;

use crate::errors::IngestError;
use crate::service::IngestService;
use tokio::sync::watch;

/// Run the ingestion endpoint until the shutdown signal fires.
///
/// Serves TLS when the config carries a `tls` section, plaintext otherwise.
pub async fn run(config: config::Config, shutdown: watch::Receiver<bool>) -> Result<(), IngestError> {
    let service = IngestService::new(shutdown.clone());

    match &config.tls {
        Some(tls) => {
            tracing::info!("serving HTTPS on {}:{}", tls.listener.host, tls.listener.port);
            server::run_https_service(
                &tls.listener.host,
                tls.listener.port,
                &tls.cert,
                &tls.key,
                service,
                shutdown,
            )
            .await
        }
        None => {
            tracing::info!(
                "serving HTTP on {}:{}",
                config.listener.host,
                config.listener.port
            );
            server::run_http_service(
                &config.listener.host,
                config.listener.port,
                service,
                shutdown,
            )
            .await
        }
    }
}
