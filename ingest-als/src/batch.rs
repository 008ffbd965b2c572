//! Batch decoding.
//!
//! A batch body is a JSON array of access-log entries. The array is split
//! into raw elements first and each element is parsed into the entry schema
//! separately: a body that is not an array fails the whole batch, while a
//! malformed element only drops that element. Keeping the elements as
//! [`RawValue`]s lets the caller log a malformed element verbatim.

use crate::accesslog::LogEntry;
use crate::errors::IngestError;
use serde_json::value::RawValue;

/// Split a body into its raw elements without touching their internals.
///
/// Fails with [`IngestError::MalformedBatch`] when the top-level value is
/// anything other than a well-formed JSON array; no partial processing
/// happens in that case.
pub fn split_batch(body: &[u8]) -> Result<Vec<Box<RawValue>>, IngestError> {
    serde_json::from_slice(body).map_err(IngestError::MalformedBatch)
}

/// Parse one raw element into the entry schema.
pub fn parse_entry(raw: &RawValue) -> Result<LogEntry, serde_json::Error> {
    serde_json::from_str(raw.get())
}
