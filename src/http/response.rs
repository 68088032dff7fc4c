//! Response carrier and its HTTP/1.1 serialization.
//!
//! A [`Response`] holds a status, headers, and a JSON data payload. The route
//! pipeline mutates it in place; only the host turns it into bytes.

use bytes::{BufMut, BytesMut};
use serde_json::Value;

use super::{Headers, StatusCode};

/// An HTTP response with a JSON data payload.
///
/// # Examples
///
/// ```
/// use routeweave::http::{Response, StatusCode};
/// use serde_json::json;
///
/// let response = Response::new(StatusCode::Created)
///     .with_header("Location", "/shop/v1/items/9")
///     .with_data(json!({"id": 9}));
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 201 Created\r\n"));
/// assert!(text.contains("Content-Type: application/json\r\n"));
/// assert!(text.ends_with("{\"id\":9}"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    data: Value,
    keep_alive: bool,
}

impl Response {
    /// Creates a response with the given status and `null` data.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            data: Value::Null,
            keep_alive: true,
        }
    }

    /// `200 OK` carrying `data`.
    pub fn ok(data: impl Into<Value>) -> Self {
        Self::new(StatusCode::Ok).with_data(data)
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = data.into();
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Sets a header in place, replacing earlier values for the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Value {
        &mut self.data
    }

    pub fn set_data(&mut self, data: impl Into<Value>) {
        self.data = data.into();
    }

    /// Serializes the response into HTTP/1.1 wire format.
    ///
    /// `null` data produces an empty body. Any other payload is written as
    /// JSON with `Content-Type: application/json` unless a handler already
    /// chose a content type. `304` and `204` never carry a body.
    pub fn into_bytes(mut self) -> BytesMut {
        let bodiless = matches!(self.status, StatusCode::NotModified | StatusCode::NoContent);
        let body = if bodiless || self.data.is_null() {
            Vec::new()
        } else {
            serde_json::to_vec(&self.data).unwrap_or_default()
        };

        if !body.is_empty() && !self.headers.contains("content-type") {
            self.headers.set("Content-Type", "application/json");
        }

        let connection = if self.keep_alive { "keep-alive" } else { "close" };
        self.headers.set("Connection", connection);

        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 64 + body.len());

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.put(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        buf.put(&b"\r\n"[..]);
        buf.put(body.as_slice());

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
