//! Conditional caching: entity tags and `304 Not Modified`.
//!
//! When a router enables it, every successful `GET` response gets an `ETag`
//! derived from its data. A client that echoes the tag in `If-None-Match`
//! receives `304 Not Modified` with no payload instead of the full body.

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::http::{Method, Request, Response, StatusCode};

/// Strong entity tag for `response`'s data: the quoted SHA-256 hex digest of
/// its JSON serialization.
///
/// # Examples
///
/// ```
/// use routeweave::etag::fingerprint;
/// use routeweave::http::Response;
/// use serde_json::json;
///
/// let a = fingerprint(&Response::ok(json!({"x": 1})));
/// let b = fingerprint(&Response::ok(json!({"x": 1})));
/// assert_eq!(a, b);
/// assert!(a.starts_with('"') && a.ends_with('"'));
/// ```
pub fn fingerprint(response: &Response) -> String {
    let body = serde_json::to_vec(response.data()).unwrap_or_default();
    let digest = Sha256::digest(&body);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("\"{hex}\"")
}

/// Whether an `If-None-Match` header value matches `etag`.
///
/// Accepts `*`, a comma-separated list, and weak (`W/`) validators, which
/// compare equal to the strong tag under weak comparison.
pub fn matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
    })
}

/// Attach an `ETag` to a `GET` `200` response and downgrade it to
/// `304 Not Modified` when the request already holds that representation.
///
/// Returns `true` when the response was downgraded. Other methods and
/// statuses are left untouched.
pub fn decorate(request: &Request, response: &mut Response) -> bool {
    if request.method() != &Method::Get || response.status() != StatusCode::Ok {
        return false;
    }

    let etag = fingerprint(response);
    let fresh = request
        .header("if-none-match")
        .is_some_and(|value| matches(value, &etag));

    response.set_header("ETag", etag.as_str());

    if fresh {
        debug!(path = %request.path(), etag = %etag, "client copy is current, sending 304");
        response.set_status(StatusCode::NotModified);
        response.set_data(serde_json::Value::Null);
    }

    fresh
}
