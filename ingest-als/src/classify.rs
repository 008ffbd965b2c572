//! Entry classification.
//!
//! Maps one parsed [`LogEntry`] to a [`Classification`]: which method, path,
//! and request id the entry describes, and whether the proxied request was
//! accepted, rejected by a rate limiter, or rejected for reasons we cannot
//! attribute. Everything past the request/response presence check is
//! best-effort with an explicit default; the metadata shape is not
//! contractually guaranteed, so a lookup that fails never fails the entry.

use crate::accesslog::{CommonProperties, LogEntry};
use std::fmt;
use thiserror::Error;

/// The response code the rate-limit filter answers with.
const RATE_LIMITED_CODE: u32 = 429;

/// Filter-metadata key the rate-limit filter publishes under.
const RATELIMIT_FILTER: &str = "envoy.filters.http.ratelimit";

const FIELD_LIMIT_NAME: &str = "aes.ratelimit.name";
const FIELD_ACTION: &str = "aes.ratelimit.action";
const FIELD_RETRY_AFTER: &str = "aes.ratelimit.retry_after";

/// The action value that marks an actual (non-simulated) rejection.
const ACTION_ENFORCE: &str = "Enforce";
/// Label used when the filter recorded no action at all. Deliberately the
/// same word as normal processing: a 429 with no recorded action is not
/// treated as a confirmed rejection.
const ACTION_DEFAULT: &str = "accept";

const LIMIT_UNKNOWN: &str = "unknown limit";
const LIMIT_UNKNOWN_NO_COMMON: &str = "unknown limit (no common properties)";

const EXPLANATION_NORMAL: &str = "(normal processing)";

/// The classifier's verdict on one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Proxied request went through (or we have no proof it did not).
    Accept,
    /// A rate limiter confirmably rejected the request.
    Reject,
    /// We saw a 429 but the entry carried nothing to prove why.
    RejectUnknown,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Disposition::Accept => "accept",
            Disposition::Reject => "REJECT",
            Disposition::RejectUnknown => "REJECT?",
        };
        f.write_str(label)
    }
}

/// What the classifier found out about one entry. Constructed fresh per
/// entry, formatted into one log line, then dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub method: String,
    pub path: String,
    pub request_id: String,
    pub response_code: u32,
    pub disposition: Disposition,
    /// Name of the limit that was hit. `None` unless the entry was a 429.
    pub limit_name: Option<String>,
    /// Seconds the client was told to wait. `None` when not supplied.
    pub retry_after: Option<i64>,
    pub explanation: String,
}

impl Classification {
    /// One human-readable summary line, tagged with the synthetic batch
    /// status and the entry's index within its batch.
    pub fn log_line(&self, status: u16, index: usize) -> String {
        format!(
            "{:03} for entry {:02}: {} {} {} ({}): {} {}",
            status,
            index,
            self.disposition,
            self.method,
            self.path,
            self.request_id,
            self.response_code,
            self.explanation
        )
    }
}

/// Entry-scoped failures. These drop the entry, never the batch.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("no request")]
    MissingRequest,

    #[error("no response")]
    MissingResponse,
}

/// Best-effort rate-limit attribution recovered from the common properties.
///
/// Every field has a defined default so the caller sees a fully-populated
/// struct instead of a chain of nested optionals.
#[derive(Debug, Clone, PartialEq)]
struct RateLimitAttribution {
    limit_name: String,
    /// The recorded limiter action. `None` only when the entry carried no
    /// common properties at all, which leaves us unable to prove anything.
    action: Option<String>,
    retry_after: Option<i64>,
}

impl RateLimitAttribution {
    fn resolve(common: Option<&CommonProperties>) -> Self {
        let Some(common) = common else {
            return RateLimitAttribution {
                limit_name: LIMIT_UNKNOWN_NO_COMMON.to_string(),
                action: None,
                retry_after: None,
            };
        };

        let fields = common
            .metadata
            .as_ref()
            .and_then(|m| m.filter_metadata.get(RATELIMIT_FILTER));

        // Three independent lookups; absence of one never blocks the others.
        let limit_name = fields
            .and_then(|f| f.get(FIELD_LIMIT_NAME))
            .and_then(|v| v.as_str())
            .unwrap_or(LIMIT_UNKNOWN)
            .to_string();

        let action = fields
            .and_then(|f| f.get(FIELD_ACTION))
            .and_then(|v| v.as_str())
            .unwrap_or(ACTION_DEFAULT)
            .to_string();

        let retry_after = fields
            .and_then(|f| f.get(FIELD_RETRY_AFTER))
            .and_then(|v| v.as_number())
            .map(|n| n as i64)
            .filter(|n| *n >= 0);

        RateLimitAttribution {
            limit_name,
            action: Some(action),
            retry_after,
        }
    }

    /// `limit_name` with the wait hint appended when one was supplied.
    fn described(&self) -> String {
        match self.retry_after {
            Some(wait) => format!("{}, wait {}", self.limit_name, wait),
            None => self.limit_name.clone(),
        }
    }
}

/// Classify one entry.
///
/// Pure and stateless: the entry is only read, and identical input yields an
/// identical result. The only failures are a missing request or response;
/// past that every lookup degrades to a documented default.
pub fn classify(entry: &LogEntry) -> Result<Classification, ClassifyError> {
    let req = entry.request.as_ref().ok_or(ClassifyError::MissingRequest)?;
    let resp = entry
        .response
        .as_ref()
        .ok_or(ClassifyError::MissingResponse)?;

    // req.path has typically been rewritten by the time it is logged; prefer
    // the path the client actually sent when we have it.
    let path = if req.original_path.is_empty() {
        req.path.clone()
    } else {
        req.original_path.clone()
    };

    let response_code = resp.response_code.unwrap_or(0);

    if response_code != RATE_LIMITED_CODE {
        return Ok(Classification {
            method: req.request_method.clone(),
            path,
            request_id: req.request_id.clone(),
            response_code,
            disposition: Disposition::Accept,
            limit_name: None,
            retry_after: None,
            explanation: EXPLANATION_NORMAL.to_string(),
        });
    }

    let attribution = RateLimitAttribution::resolve(entry.common_properties.as_ref());
    let described = attribution.described();

    let (disposition, explanation) = match attribution.action.as_deref() {
        Some(ACTION_ENFORCE) => (
            Disposition::Reject,
            format!("rate-limited by {described}"),
        ),
        // A non-enforcing action (shadow mode, log-only) is not a rejection
        // even though the code was 429.
        Some(action) => (
            Disposition::Accept,
            format!("limiter {action} by {described}"),
        ),
        None => (
            Disposition::RejectUnknown,
            format!("limiter {} by {described}", Disposition::RejectUnknown),
        ),
    };

    Ok(Classification {
        method: req.request_method.clone(),
        path,
        request_id: req.request_id.clone(),
        response_code,
        disposition,
        limit_name: Some(attribution.limit_name),
        retry_after: attribution.retry_after,
        explanation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(json: serde_json::Value) -> LogEntry {
        serde_json::from_value(json).unwrap()
    }

    fn ratelimited(fields: serde_json::Value) -> LogEntry {
        entry(serde_json::json!({
            "request": {
                "requestMethod": "GET",
                "path": "/backend/get-quote/",
                "originalPath": "/get-quote/",
                "requestId": "req-1"
            },
            "response": {"responseCode": 429},
            "commonProperties": {
                "metadata": {
                    "filterMetadata": {"envoy.filters.http.ratelimit": fields}
                }
            }
        }))
    }

    #[test]
    fn test_non_429_is_always_accept() {
        // Metadata content is irrelevant below 429.
        let mut e = ratelimited(serde_json::json!({"aes.ratelimit.action": "Enforce"}));
        e.response.as_mut().unwrap().response_code = Some(200);

        let c = classify(&e).unwrap();
        assert_eq!(c.disposition, Disposition::Accept);
        assert_eq!(c.explanation, "(normal processing)");
        assert_eq!(c.limit_name, None);
        assert_eq!(c.retry_after, None);
    }

    #[test]
    fn test_absent_response_code_is_accept() {
        let e = entry(serde_json::json!({
            "request": {"requestMethod": "GET", "path": "/x"},
            "response": {}
        }));
        let c = classify(&e).unwrap();
        assert_eq!(c.response_code, 0);
        assert_eq!(c.disposition, Disposition::Accept);
    }

    #[test]
    fn test_missing_request_or_response() {
        let no_request = entry(serde_json::json!({"response": {"responseCode": 200}}));
        assert_eq!(classify(&no_request), Err(ClassifyError::MissingRequest));

        let no_response = entry(serde_json::json!({"request": {"requestMethod": "GET"}}));
        assert_eq!(classify(&no_response), Err(ClassifyError::MissingResponse));
    }

    #[test]
    fn test_original_path_preferred() {
        let e = entry(serde_json::json!({
            "request": {"path": "/rewritten", "originalPath": "/orig"},
            "response": {"responseCode": 200}
        }));
        assert_eq!(classify(&e).unwrap().path, "/orig");

        let e = entry(serde_json::json!({
            "request": {"path": "/rewritten", "originalPath": ""},
            "response": {"responseCode": 200}
        }));
        assert_eq!(classify(&e).unwrap().path, "/rewritten");
    }

    #[test]
    fn test_429_without_common_properties() {
        let e = entry(serde_json::json!({
            "request": {"requestMethod": "GET", "path": "/q", "requestId": "req-2"},
            "response": {"responseCode": 429}
        }));

        let c = classify(&e).unwrap();
        assert_eq!(c.disposition, Disposition::RejectUnknown);
        assert_eq!(
            c.limit_name.as_deref(),
            Some("unknown limit (no common properties)")
        );
        assert_eq!(c.retry_after, None);
        assert_eq!(
            c.explanation,
            "limiter REJECT? by unknown limit (no common properties)"
        );
    }

    #[test]
    fn test_429_without_ratelimit_filter_metadata() {
        // Common properties exist but the rate-limit filter left nothing
        // behind: not confidently a rejection.
        let e = entry(serde_json::json!({
            "request": {"requestMethod": "GET", "path": "/q"},
            "response": {"responseCode": 429},
            "commonProperties": {"metadata": {"filterMetadata": {}}}
        }));

        let c = classify(&e).unwrap();
        assert_eq!(c.disposition, Disposition::Accept);
        assert_eq!(c.limit_name.as_deref(), Some("unknown limit"));
        assert_eq!(c.explanation, "limiter accept by unknown limit");
    }

    #[test]
    fn test_enforced_rate_limit() {
        let e = ratelimited(serde_json::json!({
            "aes.ratelimit.name": "per-user",
            "aes.ratelimit.action": "Enforce",
            "aes.ratelimit.retry_after": 2
        }));

        let c = classify(&e).unwrap();
        assert_eq!(c.disposition, Disposition::Reject);
        assert_eq!(c.limit_name.as_deref(), Some("per-user"));
        assert_eq!(c.retry_after, Some(2));
        assert_eq!(c.explanation, "rate-limited by per-user, wait 2");
    }

    #[test]
    fn test_enforced_without_retry_after() {
        let e = ratelimited(serde_json::json!({
            "aes.ratelimit.name": "global",
            "aes.ratelimit.action": "Enforce"
        }));

        let c = classify(&e).unwrap();
        assert_eq!(c.disposition, Disposition::Reject);
        assert_eq!(c.retry_after, None);
        assert_eq!(c.explanation, "rate-limited by global");
    }

    #[test]
    fn test_non_enforce_action_is_accept() {
        let e = ratelimited(serde_json::json!({
            "aes.ratelimit.name": "per-user",
            "aes.ratelimit.action": "LogOnly",
            "aes.ratelimit.retry_after": 5
        }));

        let c = classify(&e).unwrap();
        assert_eq!(c.disposition, Disposition::Accept);
        assert!(c.explanation.starts_with("limiter LogOnly"));
        assert_eq!(c.explanation, "limiter LogOnly by per-user, wait 5");
    }

    #[test]
    fn test_field_lookups_are_independent() {
        // Only the name is present; action and retry_after fall back.
        let e = ratelimited(serde_json::json!({"aes.ratelimit.name": "per-user"}));
        let c = classify(&e).unwrap();
        assert_eq!(c.disposition, Disposition::Accept);
        assert_eq!(c.explanation, "limiter accept by per-user");

        // Only the action is present; the name falls back.
        let e = ratelimited(serde_json::json!({"aes.ratelimit.action": "Enforce"}));
        let c = classify(&e).unwrap();
        assert_eq!(c.disposition, Disposition::Reject);
        assert_eq!(c.explanation, "rate-limited by unknown limit");
    }

    #[test]
    fn test_mistyped_fields_fall_back() {
        let e = ratelimited(serde_json::json!({
            "aes.ratelimit.name": 17,
            "aes.ratelimit.action": null,
            "aes.ratelimit.retry_after": "soon"
        }));

        let c = classify(&e).unwrap();
        assert_eq!(c.disposition, Disposition::Accept);
        assert_eq!(c.limit_name.as_deref(), Some("unknown limit"));
        assert_eq!(c.retry_after, None);
    }

    #[test]
    fn test_retry_after_truncated_and_negatives_dropped() {
        let e = ratelimited(serde_json::json!({
            "aes.ratelimit.action": "Enforce",
            "aes.ratelimit.retry_after": 2.9
        }));
        assert_eq!(classify(&e).unwrap().retry_after, Some(2));

        let e = ratelimited(serde_json::json!({
            "aes.ratelimit.action": "Enforce",
            "aes.ratelimit.retry_after": -1
        }));
        let c = classify(&e).unwrap();
        assert_eq!(c.retry_after, None);
        assert_eq!(c.explanation, "rate-limited by unknown limit");
    }

    #[test]
    fn test_classification_is_idempotent() {
        let e = ratelimited(serde_json::json!({
            "aes.ratelimit.name": "per-user",
            "aes.ratelimit.action": "Enforce",
            "aes.ratelimit.retry_after": 3
        }));
        assert_eq!(classify(&e).unwrap(), classify(&e).unwrap());
    }

    #[test]
    fn test_log_line_format() {
        let e = ratelimited(serde_json::json!({
            "aes.ratelimit.name": "per-user",
            "aes.ratelimit.action": "Enforce",
            "aes.ratelimit.retry_after": 2
        }));
        let c = classify(&e).unwrap();
        assert_eq!(
            c.log_line(404, 3),
            "404 for entry 03: REJECT GET /get-quote/ (req-1): 429 rate-limited by per-user, wait 2"
        );
    }
}
