//! Incoming request carrier and its HTTP/1.1 parser (via [`httparse`]).
//!
//! The host layer builds a [`Request`], fills its [`PathVariables`] from the
//! matched pattern's captures, and then lends it to the route pipeline, which
//! may overwrite variables (converters), replace the body, or attach the
//! parsed JSON payload.

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// Named path variables captured by the host matcher.
///
/// Values start out as the raw captured strings and may be replaced by a
/// route converter with any JSON value (a number, an object loaded by id, …).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathVariables {
    map: HashMap<String, Value>,
}

impl PathVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a variable.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.map.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.map.get(name)
    }

    /// The variable's value when it is (still) a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.map.get(name).and_then(Value::as_str)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.map.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.map.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for PathVariables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            map: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// An HTTP request as seen by routes and hooks.
///
/// # Examples
///
/// ```
/// use routeweave::http::{Method, Request};
///
/// let mut request = Request::new(Method::Get, "/shop/v1/items/42")
///     .with_header("If-None-Match", "\"abc\"");
/// request.path_vars_mut().insert("id", "42");
///
/// assert_eq!(request.header("if-none-match"), Some("\"abc\""));
/// assert_eq!(request.path_vars().get_str("id"), Some("42"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    body: Bytes,
    path_vars: PathVariables,
    json: Option<Value>,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Builds a request by hand, as a host adapter or a test would.
    pub fn new(method: impl Into<Method>, path: impl Into<String>) -> Self {
        let path = path.into();
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p.to_owned(), Some(q.to_owned())),
            None => (path, None),
        };
        Self {
            method: method.into(),
            path,
            version: 1,
            headers: Headers::new(),
            query,
            body: Bytes::new(),
            path_vars: PathVariables::new(),
            json: None,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Parse the head of a raw HTTP/1.1 request.
    ///
    /// Returns the request and the byte offset at which the body begins in
    /// `buf`. The body itself is left empty; the server attaches it with
    /// [`set_body`](Self::set_body) once `Content-Length` bytes have arrived.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: the header block is not complete yet.
    /// - [`RequestError::Parse`]: the data is malformed.
    /// - [`RequestError::MissingField`]: method, path, or version is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?;
        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut request = Self::new(method, raw_path);
        request.version = version;
        request.headers = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                request.headers.insert(header.name, value);
            }
        }

        Ok((request, body_offset))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Header lookup by name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Replace the raw body.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    pub fn path_vars(&self) -> &PathVariables {
        &self.path_vars
    }

    pub fn path_vars_mut(&mut self) -> &mut PathVariables {
        &mut self.path_vars
    }

    /// The body parsed as JSON, present only on routes that accept JSON.
    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    pub fn set_json(&mut self, json: Value) {
        self.json = Some(json);
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_head_only() {
        let raw = b"GET /shop/v1/items/7?expand=1 HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/shop/v1/items/7");
        assert_eq!(req.query_string(), Some("expand=1"));
        assert_eq!(req.header("host"), Some("localhost"));
        assert_eq!(offset, raw.len());
        assert!(req.path_vars().is_empty());
    }

    #[test]
    fn parse_leaves_body_for_the_caller() {
        let raw = b"POST /items HTTP/1.1\r\nContent-Length: 7\r\n\r\n{\"a\":1}";
        let (mut req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length(), Some(7));
        assert!(req.body().is_empty());
        req.set_body(raw[offset..].to_vec());
        assert_eq!(&req.body()[..], b"{\"a\":1}");
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn keep_alive_defaults() {
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(req.is_keep_alive());
        let (req, _) = Request::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn path_variables_accept_any_json_value() {
        let mut req = Request::new("GET", "/users/5");
        req.path_vars_mut().insert("id", "5");
        assert_eq!(req.path_vars().get_str("id"), Some("5"));

        req.path_vars_mut().insert("id", 5);
        assert_eq!(req.path_vars().get("id"), Some(&Value::from(5)));
        assert_eq!(req.path_vars().get_str("id"), None);
    }
}
