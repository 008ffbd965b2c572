//! Listener loops.
//!
//! Plaintext and TLS accept loops that hand each connection to hyper's auto
//! (h1/h2) builder. Both observe a shutdown signal: once it fires they stop
//! accepting, finish the connections already in flight, and return.

use crate::errors::IngestError;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use std::convert::Infallible;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::{TlsAcceptor, rustls};

/// Service shape both loops accept.
pub trait IngestHttpService:
    Service<
        Request<Incoming>,
        Response = Response<BoxBody<Bytes, Infallible>>,
        Error = IngestError,
        Future: Send + 'static,
    > + Send
    + Sync
    + 'static
{
}

impl<S> IngestHttpService for S where
    S: Service<
            Request<Incoming>,
            Response = Response<BoxBody<Bytes, Infallible>>,
            Error = IngestError,
            Future: Send + 'static,
        > + Send
        + Sync
        + 'static
{
}

pub async fn run_http_service<S: IngestHttpService>(
    host: &str,
    port: u16,
    service: S,
    shutdown: watch::Receiver<bool>,
) -> Result<(), IngestError> {
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    serve(listener, service, shutdown).await
}

pub async fn run_https_service<S: IngestHttpService>(
    host: &str,
    port: u16,
    cert: &Path,
    key: &Path,
    service: S,
    shutdown: watch::Receiver<bool>,
) -> Result<(), IngestError> {
    let tls = load_tls_config(cert, key)?;
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    serve_tls(listener, tls, service, shutdown).await
}

/// Accept loop over an already-bound listener.
pub async fn serve<S: IngestHttpService>(
    listener: TcpListener,
    service: S,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), IngestError> {
    let service = Arc::new(service);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                let (stream, _peer_addr) = accepted?;
                let _ = stream.set_nodelay(true);
                let io = TokioIo::new(stream);
                let svc = service.clone();

                // Hand the connection to hyper; auto-detect h1/h2 on this socket
                connections.spawn(async move {
                    let _ = Builder::new(TokioExecutor::new())
                        .serve_connection(io, svc)
                        .await;
                });
            }
        }
    }

    // Shutdown: in-flight connections get to finish.
    while connections.join_next().await.is_some() {}
    Ok(())
}

/// TLS accept loop. The handshake happens on the connection task so a slow
/// or failing handshake never stalls the accept loop.
pub async fn serve_tls<S: IngestHttpService>(
    listener: TcpListener,
    tls: Arc<rustls::ServerConfig>,
    service: S,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), IngestError> {
    let service = Arc::new(service);
    let acceptor = TlsAcceptor::from(tls);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted?;
                let _ = stream.set_nodelay(true);
                let acceptor = acceptor.clone();
                let svc = service.clone();

                connections.spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            tracing::warn!(peer = %peer_addr, "TLS handshake failed: {e}");
                            return;
                        }
                    };
                    let _ = Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(tls_stream), svc)
                        .await;
                });
            }
        }
    }

    while connections.join_next().await.is_some() {}
    Ok(())
}

/// Load a certificate chain and private key from PEM files.
pub fn load_tls_config(cert: &Path, key: &Path) -> Result<Arc<rustls::ServerConfig>, IngestError> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert)?))
        .collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(IngestError::Tls(
            cert.display().to_string(),
            "no certificates found".to_string(),
        ));
    }

    let key_der = rustls_pemfile::private_key(&mut BufReader::new(File::open(key)?))?
        .ok_or_else(|| {
            IngestError::Tls(key.display().to_string(), "no private key found".to_string())
        })?;

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key_der)
        .map_err(|e| IngestError::Tls(cert.display().to_string(), e.to_string()))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}
