//! Per-request context handed to converters, hooks, and handlers.
//!
//! Every callback receives the same `&mut Context` and takes only what it
//! needs from it: the request, the working response, or any of the route's
//! path variables by name.
//!
//! ```rust
//! use routeweave::context::Context;
//! use routeweave::reply::ApiError;
//! use serde_json::{Value, json};
//!
//! fn show(ctx: &mut Context<'_>) -> Result<Value, ApiError> {
//!     let id = ctx.var("id").cloned().unwrap_or(Value::Null);
//!     ctx.response_mut().set_header("Cache-Control", "max-age=60");
//!     Ok(json!({ "id": id }))
//! }
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::http::{Request, Response};
use crate::pattern::Binding;
use crate::route::DispatchError;

pub struct Context<'a> {
    request: &'a mut Request,
    response: Response,
    bindings: &'a [Binding],
}

impl<'a> Context<'a> {
    /// Start a context with a default `200` response and no data.
    pub fn new(request: &'a mut Request, bindings: &'a [Binding]) -> Self {
        Self {
            request,
            response: Response::default(),
            bindings,
        }
    }

    pub fn request(&self) -> &Request {
        &*self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut *self.request
    }

    /// The working response: what the client gets unless a later step replaces it.
    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Whether `name` is one of this route's path variables.
    pub fn is_bound(&self, name: &str) -> bool {
        self.bindings.iter().any(|b| b.name == name)
    }

    /// Names of the route's path variables, in template order.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|b| b.name.as_str())
    }

    /// Current value of a path variable.
    ///
    /// Returns `None` for names that are not path variables of this route,
    /// even if the host put something under that name on the request.
    pub fn var(&self, name: &str) -> Option<&Value> {
        if self.is_bound(name) {
            self.request.path_vars().get(name)
        } else {
            None
        }
    }

    /// Like [`var`](Self::var), for variables that are still raw strings.
    pub fn var_str(&self, name: &str) -> Option<&str> {
        self.var(name).and_then(Value::as_str)
    }

    /// Like [`var`](Self::var), but an unknown name is a configuration bug.
    ///
    /// # Errors
    ///
    /// [`DispatchError::UnboundVariable`] when `name` is not bound by the
    /// route or the host did not supply it.
    pub fn require_var(&self, name: &str) -> Result<&Value, DispatchError> {
        self.var(name).ok_or_else(|| DispatchError::UnboundVariable {
            name: name.to_owned(),
        })
    }

    /// Deserialize the request payload.
    ///
    /// Uses the JSON already parsed for routes that accept JSON, and the raw
    /// body otherwise.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        match self.request.json() {
            Some(value) => T::deserialize(value),
            None => serde_json::from_slice(self.request.body()),
        }
    }

    pub(crate) fn set_var(&mut self, name: &str, value: Value) {
        self.request.path_vars_mut().insert(name, value);
    }

    pub(crate) fn replace_response(&mut self, response: Response) {
        self.response = response;
    }

    pub(crate) fn into_response(self) -> Response {
        self.response
    }
}
