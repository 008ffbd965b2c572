use thiserror::Error;

/// Errors that can occur while ingesting a batch.
///
/// Only `MalformedBatch` and `RequestBodyError` ever affect the outer
/// response (they map to a 400); element- and entry-scoped failures are
/// surfaced purely through diagnostics and never reach this type.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Request body is not a JSON array: {0}")]
    MalformedBatch(#[source] serde_json::Error),

    #[error("Invalid TLS material in {0}: {1}")]
    Tls(String, String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
