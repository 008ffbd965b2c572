//! Envoy ALS access-log entry schema.
//!
//! This mirrors the jsonpb encoding of `HTTPAccessLogEntry` as emitted by an
//! Envoy HTTP access-log sink: camelCase keys, every field optional, and the
//! filter metadata carried as a dynamically-keyed bag of loosely-typed values.
//! The schema is externally defined and consumed read-only; nothing here is
//! ever serialized back out.

use serde::Deserialize;
use std::collections::HashMap;

/// One access-log entry describing a single proxied HTTP transaction.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LogEntry {
    pub request: Option<RequestProperties>,
    pub response: Option<ResponseProperties>,
    pub common_properties: Option<CommonProperties>,
}

/// Properties of the request that was proxied (not the request carrying the
/// batch).
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestProperties {
    pub request_method: String,
    /// The path Envoy sent upstream, typically already rewritten.
    pub path: String,
    /// The path the client actually sent. Empty for rejected requests.
    pub original_path: String,
    pub request_id: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseProperties {
    /// jsonpb renders the wrapped UInt32Value as a bare number; it may be
    /// absent entirely.
    pub response_code: Option<u32>,
    pub response_code_details: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CommonProperties {
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Metadata {
    /// Filter name -> field name -> value.
    pub filter_metadata: HashMap<String, HashMap<String, MetaValue>>,
}

/// A loosely-typed filter-metadata value (a protobuf `Struct` field).
///
/// Lookups are tolerant: asking for the wrong primitive type yields `None`,
/// never an error. Filters other than the ones we understand may attach
/// nested lists and objects, so those shapes parse too.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<MetaValue>),
    Object(HashMap<String, MetaValue>),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetaValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}
