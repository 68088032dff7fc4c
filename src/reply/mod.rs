//! What callbacks hand back, and what the pipeline hands to the host.
//!
//! Handlers and hooks may produce nothing, raw data, a full [`Response`], or
//! an [`ApiError`]. Each of those converts through [`IntoReply`] into one
//! tagged [`Reply`] that the pipeline folds into the working response. The
//! pipeline's own result is an [`Outcome`]: the final response, or the error
//! that short-circuited it.
//!
//! Fatal failures are a separate channel: an `Err(DispatchError)` is never
//! turned into an [`ApiError`], it bubbles to the host.

use serde_json::{Value, json};
use thiserror::Error;

use crate::http::{Response, StatusCode};
use crate::route::DispatchError;

/// A handler-declared failure, rendered to the client as a structured error.
///
/// # Examples
///
/// ```
/// use routeweave::http::StatusCode;
/// use routeweave::reply::ApiError;
///
/// let err = ApiError::not_found("item_missing", "No item with that id.");
/// let response = err.into_response();
///
/// assert_eq!(response.status(), StatusCode::NotFound);
/// assert_eq!(response.data()["code"], "item_missing");
/// assert_eq!(response.data()["data"]["status"], 404);
/// ```
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
    data: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BadRequest, code, message)
    }

    pub fn forbidden(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::Forbidden, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, code, message)
    }

    /// Attach extra fields; objects are merged into the rendered `data` member.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Render as `{"code", "message", "data": {"status", ..extra}}`.
    pub fn into_response(self) -> Response {
        let mut data = json!({ "status": self.status.as_u16() });
        match self.data {
            Some(Value::Object(extra)) => {
                if let Value::Object(map) = &mut data {
                    map.extend(extra);
                }
            }
            Some(other) => data["details"] = other,
            None => {}
        }

        Response::new(self.status).with_data(json!({
            "code": self.code,
            "message": self.message,
            "data": data,
        }))
    }
}

/// The tagged result of one handler or hook invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Nothing to report; the working response is left as is.
    Empty,
    /// Raw data for the working response, keeping its status and headers.
    Data(Value),
    /// A complete response that replaces the working one.
    Response(Response),
    /// A declared failure; the rest of the pipeline is skipped.
    Error(ApiError),
}

/// Conversion of a callback's return value into a [`Reply`].
///
/// `()`, `None`, and JSON `null` are empty. Only those count as empty:
/// `false`, `0`, `""`, and `[]` are real data.
pub trait IntoReply {
    fn into_reply(self) -> Result<Reply, DispatchError>;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Result<Reply, DispatchError> {
        Ok(self)
    }
}

impl IntoReply for () {
    fn into_reply(self) -> Result<Reply, DispatchError> {
        Ok(Reply::Empty)
    }
}

impl IntoReply for Value {
    fn into_reply(self) -> Result<Reply, DispatchError> {
        Ok(if self.is_null() {
            Reply::Empty
        } else {
            Reply::Data(self)
        })
    }
}

impl IntoReply for String {
    fn into_reply(self) -> Result<Reply, DispatchError> {
        Ok(Reply::Data(Value::String(self)))
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Result<Reply, DispatchError> {
        Ok(Reply::Data(Value::from(self)))
    }
}

impl IntoReply for Response {
    fn into_reply(self) -> Result<Reply, DispatchError> {
        Ok(Reply::Response(self))
    }
}

impl IntoReply for ApiError {
    fn into_reply(self) -> Result<Reply, DispatchError> {
        Ok(Reply::Error(self))
    }
}

impl<T: IntoReply> IntoReply for Option<T> {
    fn into_reply(self) -> Result<Reply, DispatchError> {
        self.map_or(Ok(Reply::Empty), IntoReply::into_reply)
    }
}

impl<T: IntoReply> IntoReply for Result<T, ApiError> {
    fn into_reply(self) -> Result<Reply, DispatchError> {
        match self {
            Ok(value) => value.into_reply(),
            Err(err) => Ok(Reply::Error(err)),
        }
    }
}

impl<T: IntoReply> IntoReply for Result<T, DispatchError> {
    fn into_reply(self) -> Result<Reply, DispatchError> {
        self?.into_reply()
    }
}

/// The result of running a route's pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Response(Response),
    Error(ApiError),
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Response(response) => Some(response),
            Self::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ApiError> {
        match self {
            Self::Response(_) => None,
            Self::Error(err) => Some(err),
        }
    }

    /// Flatten into a wire response, rendering errors with their status.
    pub fn into_response(self) -> Response {
        match self {
            Self::Response(response) => response,
            Self::Error(err) => err.into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_values() {
        assert_eq!(().into_reply().unwrap(), Reply::Empty);
        assert_eq!(Value::Null.into_reply().unwrap(), Reply::Empty);
        assert_eq!(None::<Value>.into_reply().unwrap(), Reply::Empty);
    }

    #[test]
    fn falsy_json_is_still_data() {
        assert_eq!(json!(false).into_reply().unwrap(), Reply::Data(json!(false)));
        assert_eq!(json!(0).into_reply().unwrap(), Reply::Data(json!(0)));
        assert_eq!(json!([]).into_reply().unwrap(), Reply::Data(json!([])));
    }

    #[test]
    fn result_channels_stay_separate() {
        let declared: Result<Value, ApiError> = Err(ApiError::bad_request("nope", "bad"));
        assert!(matches!(declared.into_reply(), Ok(Reply::Error(_))));

        let fatal: Result<Value, DispatchError> = Err(DispatchError::UnboundVariable {
            name: "slug".to_owned(),
        });
        assert!(matches!(
            fatal.into_reply(),
            Err(DispatchError::UnboundVariable { .. })
        ));
    }

    #[test]
    fn error_rendering_merges_object_data() {
        let response = ApiError::new(StatusCode::Conflict, "taken", "Name taken.")
            .with_data(json!({"field": "name"}))
            .into_response();
        assert_eq!(response.status(), StatusCode::Conflict);
        assert_eq!(
            response.data(),
            &json!({
                "code": "taken",
                "message": "Name taken.",
                "data": {"status": 409, "field": "name"},
            })
        );
    }

    #[test]
    fn outcome_accessors() {
        let ok = Outcome::Response(Response::ok("hi"));
        assert!(!ok.is_error());
        assert_eq!(ok.response().map(|r| r.data().clone()), Some(json!("hi")));

        let failed = Outcome::Error(ApiError::forbidden("denied", "No."));
        assert!(failed.is_error());
        assert_eq!(failed.into_response().status(), StatusCode::Forbidden);
    }
}
