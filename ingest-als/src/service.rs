//! The ingestion service.
//!
//! One hyper `Service` that accepts a batch of access-log entries, classifies
//! each one, and answers with a synthetic status picked from the outer
//! request's path. A subtlety worth keeping in mind: the HTTP request we
//! receive carries a body describing *different* HTTP requests. The entries
//! in the body are what we talk to the user about; the outer request only
//! lends its method, path, and `X-Request-Id` to diagnostics emitted before
//! an entry has been parsed successfully.

use crate::batch::{parse_entry, split_batch};
use crate::classify::{Classification, classify};
use crate::errors::IngestError;
use http_body_util::{BodyExt, Empty, combinators::BoxBody};
use hyper::body::{Body, Bytes};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::watch;

/// Fallback label when the outer request carries no `X-Request-Id`.
const NO_REQUEST_ID: &str = "no-request-id";

/// Pick the synthetic batch status from the outer request's path.
///
/// A pure lookup table for test harnesses that want to force a specific
/// status. The default is 500 rather than 200 simply because it is another
/// useful value to exercise when nothing more specific was configured.
pub fn demo_status(path: &str) -> StatusCode {
    match path {
        "/200" => StatusCode::OK,
        "/404" => StatusCode::NOT_FOUND,
        "/501" => StatusCode::NOT_IMPLEMENTED,
        "/503" => StatusCode::SERVICE_UNAVAILABLE,
        "/505" => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
        "/511" => StatusCode::NETWORK_AUTHENTICATION_REQUIRED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Identity of the outer request, captured early so diagnostics have a
/// usable label even when nothing in the body parses.
#[derive(Debug, Clone)]
struct OuterRequest {
    method: String,
    path: String,
    request_id: String,
}

impl OuterRequest {
    fn from_request<B>(req: &Request<B>) -> Self {
        let request_id = req
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or(NO_REQUEST_ID)
            .to_string();

        OuterRequest {
            method: req.method().to_string(),
            path: req.uri().path().to_string(),
            request_id,
        }
    }

    /// Diagnostic for an element dropped at `index`, keeping the element's
    /// raw payload around for postmortem debugging.
    fn dropped_entry_line(&self, index: usize, reason: &str, raw: &str) -> String {
        format!(
            "--- for {} {} ({}): error at entry {:02}: {}: {}",
            self.method, self.path, self.request_id, index, reason, raw
        )
    }
}

/// Decode and classify one batch body, emitting one summary line per
/// classified entry and one diagnostic per dropped element.
///
/// Element failures are contained: a malformed or incomplete element is
/// logged with its index and skipped, and the rest of the batch proceeds in
/// index order. Only a body that is not a JSON array is an error.
fn process_batch(
    body: &[u8],
    status: StatusCode,
    outer: &OuterRequest,
    shutdown: &watch::Receiver<bool>,
) -> Result<Vec<Classification>, IngestError> {
    let raw_entries = split_batch(body)?;
    let mut results = Vec::with_capacity(raw_entries.len());

    for (i, raw) in raw_entries.iter().enumerate() {
        // Large batches should notice a shutdown without finishing.
        if *shutdown.borrow() {
            tracing::warn!(
                "--- for {} {} ({}): shutting down, dropping remaining {} entries",
                outer.method,
                outer.path,
                outer.request_id,
                raw_entries.len() - i
            );
            break;
        }

        let entry = match parse_entry(raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!(
                    "{}",
                    outer.dropped_entry_line(i, &format!("decode failed: {e}"), raw.get())
                );
                continue;
            }
        };

        match classify(&entry) {
            Ok(classification) => {
                tracing::info!("{}", classification.log_line(status.as_u16(), i));
                results.push(classification);
            }
            Err(e) => {
                tracing::error!("{}", outer.dropped_entry_line(i, &e.to_string(), raw.get()));
            }
        }
    }

    Ok(results)
}

fn empty_response(status: StatusCode) -> Result<Response<BoxBody<Bytes, Infallible>>, IngestError> {
    Response::builder()
        .status(status)
        .body(Empty::<Bytes>::new().map_err(|e| match e {}).boxed())
        .map_err(|e| IngestError::InternalError(format!("failed to build response: {e}")))
}

async fn handle<B>(
    req: Request<B>,
    shutdown: watch::Receiver<bool>,
) -> Result<Response<BoxBody<Bytes, Infallible>>, IngestError>
where
    B: Body,
    B::Error: std::error::Error,
{
    let outer = OuterRequest::from_request(&req);
    let status = demo_status(&outer.path);

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let e = IngestError::RequestBodyError(e.to_string());
            tracing::error!(
                "400 for {} {} ({}): {}",
                outer.method,
                outer.path,
                outer.request_id,
                e
            );
            return empty_response(StatusCode::BAD_REQUEST);
        }
    };

    match process_batch(&body, status, &outer, &shutdown) {
        Ok(_) => empty_response(status),
        Err(e) => {
            tracing::error!(
                "400 for {} {} ({}): error decoding body: {}",
                outer.method,
                outer.path,
                outer.request_id,
                e
            );
            empty_response(StatusCode::BAD_REQUEST)
        }
    }
}

/// The batch-ingestion service. Stateless between requests; the only thing
/// it holds is the shutdown signal it threads into each batch loop.
#[derive(Clone)]
pub struct IngestService {
    shutdown: watch::Receiver<bool>,
}

impl IngestService {
    pub fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self { shutdown }
    }
}

impl<B> Service<Request<B>> for IngestService
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = IngestError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let shutdown = self.shutdown.clone();
        Box::pin(handle(req, shutdown))
    }
}
