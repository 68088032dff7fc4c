//! A single method + path + handler binding and its request pipeline.
//!
//! A [`Route`] is configured with chained builder calls and then executed
//! once per matched request:
//!
//! 1. Parse the body as JSON when the route accepts JSON.
//! 2. Run converters for path variables the template binds, replacing each
//!    raw capture with the converter's value.
//! 3. Run before-hooks in order.
//! 4. Run the handler.
//! 5. Run after-hooks in order, unless the outcome is already an error.
//!
//! Every callback result is folded into the working response the same way:
//! empty leaves it alone, data replaces the payload but keeps status and
//! headers, a response replaces it wholesale, and an [`ApiError`] stops the
//! pipeline and becomes the outcome.
//!
//! # Examples
//!
//! ```rust
//! use routeweave::http::{Method, Request};
//! use routeweave::route::Route;
//! use serde_json::json;
//!
//! let mut route = Route::new(Method::Get, "/items/{id}", |ctx| {
//!     json!({ "id": ctx.var("id").cloned() })
//! });
//! route
//!     .assert("id", r"\d+")
//!     .convert("id", |_, raw| raw.as_str().and_then(|s| s.parse::<u64>().ok()));
//!
//! let mut request = Request::new(Method::Get, "/items/7");
//! request.path_vars_mut().insert("id", "7");
//!
//! let outcome = route.execute(&mut request).unwrap();
//! assert_eq!(outcome.response().unwrap().data(), &json!({ "id": 7 }));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};

use crate::context::Context;
use crate::http::{Method, Request};
use crate::pattern::{self, Binding, CompiledPattern, PatternError};
use crate::reply::{ApiError, IntoReply, Outcome, Reply};

/// Failures that abort dispatch instead of producing a response.
///
/// These are configuration or programming bugs. The pipeline never turns
/// them into an [`ApiError`]; the host decides how to report them.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("`{name}` is not a path variable of this route")]
    UnboundVariable { name: String },

    #[error("converter for `{variable}` returned a value that is not representable as JSON: {source}")]
    Conversion {
        variable: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("JSON error in callback: {0}")]
    Json(#[from] serde_json::Error),

    #[error("callback failed: {0}")]
    Callback(Box<dyn std::error::Error + Send + Sync>),
}

impl DispatchError {
    /// Wrap any error raised inside a handler, hook, or converter.
    pub fn callback(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Callback(err.into())
    }
}

/// Type-erased handler or hook.
///
/// Stored behind `Arc` so a route's callbacks can be shared with the host's
/// dispatch closures and across worker threads without copying them.
pub type Handler =
    Arc<dyn Fn(&mut Context<'_>) -> Result<Reply, DispatchError> + Send + Sync + 'static>;

/// Hooks have the same shape as handlers.
pub type Hook = Handler;

/// Type-erased converter: current variable value in, replacement value out.
pub type Converter =
    Arc<dyn Fn(&Context<'_>, &Value) -> Result<Value, DispatchError> + Send + Sync + 'static>;

/// Erase a handler or hook closure.
pub(crate) fn erase<F, R>(callback: F) -> Handler
where
    F: Fn(&mut Context<'_>) -> R + Send + Sync + 'static,
    R: IntoReply,
{
    Arc::new(move |ctx: &mut Context<'_>| callback(ctx).into_reply())
}

#[derive(Clone)]
pub struct Route {
    method: Method,
    template: String,
    handler: Handler,
    before: Vec<Hook>,
    after: Vec<Hook>,
    asserts: HashMap<String, String>,
    converters: HashMap<String, Converter>,
    accept_json: bool,
    // Derived from `template` + `asserts`; reset whenever an assert changes.
    compiled: OnceLock<CompiledPattern>,
}

impl Route {
    pub fn new<F, R>(method: impl Into<Method>, template: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut Context<'_>) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        Self {
            method: method.into(),
            template: template.into(),
            handler: erase(handler),
            before: Vec::new(),
            after: Vec::new(),
            asserts: HashMap::new(),
            converters: HashMap::new(),
            accept_json: false,
            compiled: OnceLock::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The path template as written, placeholders included.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// The compiled pattern, ready for the host matcher.
    ///
    /// # Errors
    ///
    /// Any [`PatternError`] from compiling the template.
    pub fn path(&self) -> Result<&str, PatternError> {
        self.compiled().map(CompiledPattern::pattern)
    }

    /// Compile the template with the current asserts, caching the result.
    pub fn compiled(&self) -> Result<&CompiledPattern, PatternError> {
        if let Some(compiled) = self.compiled.get() {
            return Ok(compiled);
        }
        let compiled = pattern::compile(&self.template, &self.asserts)?;
        Ok(self.compiled.get_or_init(|| compiled))
    }

    pub fn bindings(&self) -> Result<&[Binding], PatternError> {
        self.compiled().map(CompiledPattern::bindings)
    }

    /// Path variable names in template order.
    pub fn variables(&self) -> Result<Vec<&str>, PatternError> {
        Ok(self.compiled()?.variables().collect())
    }

    pub fn accepts_json(&self) -> bool {
        self.accept_json
    }

    pub fn before_hooks(&self) -> &[Hook] {
        &self.before
    }

    pub fn after_hooks(&self) -> &[Hook] {
        &self.after
    }

    /// Parse the request body as JSON before anything else runs.
    pub fn accept_json(&mut self, accept: bool) -> &mut Self {
        self.accept_json = accept;
        self
    }

    /// Constrain `variable` to text matching `pattern`. Replaces any earlier
    /// assert for the same variable.
    pub fn assert(&mut self, variable: impl Into<String>, pattern: impl Into<String>) -> &mut Self {
        self.asserts.insert(variable.into(), pattern.into());
        self.compiled = OnceLock::new();
        self
    }

    /// Replace `variable`'s raw capture with `converter`'s result before any
    /// hook runs. Replaces any earlier converter for the same variable.
    ///
    /// The converter sees the context and the variable's current value; its
    /// return value is stored as JSON, so `Option<T>` yields `null` on `None`.
    pub fn convert<F, T>(&mut self, variable: impl Into<String>, converter: F) -> &mut Self
    where
        F: Fn(&Context<'_>, &Value) -> T + Send + Sync + 'static,
        T: Serialize,
    {
        let variable = variable.into();
        let name = variable.clone();
        let converter: Converter = Arc::new(move |ctx: &Context<'_>, raw: &Value| {
            serde_json::to_value(converter(ctx, raw)).map_err(|source| {
                DispatchError::Conversion {
                    variable: name.clone(),
                    source,
                }
            })
        });
        self.converters.insert(variable, converter);
        self
    }

    pub fn before<F, R>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut Context<'_>) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.before.push(erase(hook));
        self
    }

    pub fn after<F, R>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut Context<'_>) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.after.push(erase(hook));
        self
    }

    /// Run the pipeline against `request` with this route's own hooks.
    ///
    /// The request's path variables must already hold the captured values.
    ///
    /// # Errors
    ///
    /// A [`DispatchError`] returned by any callback, a converter value that
    /// cannot be stored, or a template that fails to compile.
    pub fn execute(&self, request: &mut Request) -> Result<Outcome, DispatchError> {
        self.run(request, &self.before, &self.after)
    }

    /// Run the pipeline with explicit hook lists; the router passes its own
    /// hooks followed by the route's.
    pub(crate) fn run(
        &self,
        request: &mut Request,
        before: &[Hook],
        after: &[Hook],
    ) -> Result<Outcome, DispatchError> {
        let compiled = self.compiled()?;

        if self.accept_json && !request.body().is_empty() {
            match serde_json::from_slice::<Value>(request.body()) {
                Ok(json) => request.set_json(json),
                Err(e) => {
                    debug!(route = %self.template, error = %e, "rejecting malformed JSON body");
                    return Ok(Outcome::Error(ApiError::bad_request(
                        "invalid_json",
                        format!("Invalid JSON body passed: {e}"),
                    )));
                }
            }
        }

        let mut ctx = Context::new(request, compiled.bindings());
        self.convert_variables(compiled, &mut ctx)?;

        for (i, hook) in before.iter().enumerate() {
            trace!(route = %self.template, hook = i, "before hook");
            let reply = hook(&mut ctx)?;
            if let ControlFlow::Break(err) = fold(&mut ctx, reply) {
                debug!(route = %self.template, code = %err.code(), "before hook rejected request");
                return Ok(Outcome::Error(err));
            }
        }

        let reply = (self.handler)(&mut ctx)?;
        if let ControlFlow::Break(err) = fold(&mut ctx, reply) {
            return Ok(Outcome::Error(err));
        }

        for (i, hook) in after.iter().enumerate() {
            trace!(route = %self.template, hook = i, "after hook");
            let reply = hook(&mut ctx)?;
            if let ControlFlow::Break(err) = fold(&mut ctx, reply) {
                return Ok(Outcome::Error(err));
            }
        }

        Ok(Outcome::Response(ctx.into_response()))
    }

    fn convert_variables(
        &self,
        compiled: &CompiledPattern,
        ctx: &mut Context<'_>,
    ) -> Result<(), DispatchError> {
        for binding in compiled.bindings() {
            let Some(converter) = self.converters.get(&binding.name) else {
                continue;
            };
            let Some(raw) = ctx.request().path_vars().get(&binding.name).cloned() else {
                continue;
            };
            let converted = converter(&*ctx, &raw)?;
            debug!(route = %self.template, variable = %binding.name, "converted path variable");
            ctx.set_var(&binding.name, converted);
        }
        Ok(())
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("template", &self.template)
            .field("asserts", &self.asserts)
            .field("converters", &self.converters.keys().collect::<Vec<_>>())
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("accept_json", &self.accept_json)
            .finish()
    }
}

// Fold one callback's reply into the working response.
fn fold(ctx: &mut Context<'_>, reply: Reply) -> ControlFlow<ApiError> {
    match reply {
        Reply::Empty => {}
        Reply::Data(data) => ctx.response_mut().set_data(data),
        Reply::Response(response) => ctx.replace_response(response),
        Reply::Error(err) => return ControlFlow::Break(err),
    }
    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::http::{Response, StatusCode};

    type Log = Arc<Mutex<Vec<String>>>;

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    fn request(path: &str, vars: &[(&str, &str)]) -> Request {
        let mut req = Request::new(Method::Get, path);
        for (name, value) in vars {
            req.path_vars_mut().insert(*name, *value);
        }
        req
    }

    fn response(outcome: Outcome) -> Response {
        match outcome {
            Outcome::Response(r) => r,
            Outcome::Error(e) => panic!("expected a response, got {e:?}"),
        }
    }

    // ── compiled path ─────────────────────────────────────────────────────────

    #[test]
    fn path_reflects_asserts() {
        let mut route = Route::new(Method::Get, "/items/{id}", |_| ());
        assert_eq!(route.path().unwrap(), "/items/(?P<id>[^/]+)");

        route.assert("id", r"\d+");
        assert_eq!(route.path().unwrap(), r"/items/(?P<id>\d+)");

        route.assert("id", "[a-z]+");
        assert_eq!(route.path().unwrap(), "/items/(?P<id>[a-z]+)");
    }

    #[test]
    fn variables_follow_template_order() {
        let route = Route::new(Method::Get, "/{shop}/items/{id}", |_| ());
        assert_eq!(route.variables().unwrap(), vec!["shop", "id"]);
    }

    #[test]
    fn bad_template_surfaces_on_execute() {
        let route = Route::new(Method::Get, "/{id}/{id}", |_| ());
        let err = route.execute(&mut request("/1/1", &[])).unwrap_err();
        assert!(matches!(err, DispatchError::Pattern(PatternError::DuplicatePlaceholder { .. })));
    }

    // ── result normalization ──────────────────────────────────────────────────

    #[test]
    fn empty_reply_keeps_default_response() {
        let route = Route::new(Method::Get, "/ping", |_| ());
        let res = response(route.execute(&mut request("/ping", &[])).unwrap());
        assert_eq!(res.status(), StatusCode::Ok);
        assert!(res.data().is_null());
    }

    #[test]
    fn data_reply_sets_payload_and_keeps_headers() {
        let mut route = Route::new(Method::Get, "/ping", |_| json!({"x": 1}));
        route.before(|ctx| {
            ctx.response_mut().set_status(StatusCode::Accepted);
            ctx.response_mut().set_header("X-Seen", "yes");
        });

        let res = response(route.execute(&mut request("/ping", &[])).unwrap());
        assert_eq!(res.data(), &json!({"x": 1}));
        assert_eq!(res.status(), StatusCode::Accepted);
        assert_eq!(res.header("x-seen"), Some("yes"));
    }

    #[test]
    fn response_reply_replaces_working_response() {
        let mut route = Route::new(Method::Get, "/ping", |_| {
            Response::new(StatusCode::Created).with_data("made")
        });
        route.before(|ctx| ctx.response_mut().set_header("X-Lost", "1"));

        let res = response(route.execute(&mut request("/ping", &[])).unwrap());
        assert_eq!(res.status(), StatusCode::Created);
        assert_eq!(res.header("x-lost"), None);
    }

    #[test]
    fn error_reply_skips_after_hooks() {
        let calls = log();
        let seen = Arc::clone(&calls);
        let mut route = Route::new(Method::Get, "/items/{id}", |_| {
            Err::<Value, _>(ApiError::not_found("missing", "gone"))
        });
        route.after(move |_| seen.lock().unwrap().push("after".to_owned()));

        let outcome = route.execute(&mut request("/items/1", &[("id", "1")])).unwrap();
        assert_eq!(outcome.error().map(ApiError::code), Some("missing"));
        assert!(entries(&calls).is_empty());
    }

    #[test]
    fn after_hooks_see_handler_data() {
        let mut route = Route::new(Method::Get, "/n", |_| json!(1));
        route.after(|ctx| {
            let doubled = ctx.response().data().as_i64().unwrap_or_default() * 2;
            json!(doubled)
        });

        let res = response(route.execute(&mut request("/n", &[])).unwrap());
        assert_eq!(res.data(), &json!(2));
    }

    // ── hooks ─────────────────────────────────────────────────────────────────

    #[test]
    fn hooks_run_in_registration_order() {
        let calls = log();
        let (a, b, h, c) = (
            Arc::clone(&calls),
            Arc::clone(&calls),
            Arc::clone(&calls),
            Arc::clone(&calls),
        );
        let mut route = Route::new(Method::Get, "/x", move |_| h.lock().unwrap().push("handler".to_owned()));
        route
            .before(move |_| a.lock().unwrap().push("before-1".to_owned()))
            .before(move |_| b.lock().unwrap().push("before-2".to_owned()))
            .after(move |_| c.lock().unwrap().push("after-1".to_owned()));

        route.execute(&mut request("/x", &[])).unwrap();
        assert_eq!(entries(&calls), vec!["before-1", "before-2", "handler", "after-1"]);
    }

    #[test]
    fn before_hook_error_skips_handler() {
        let calls = log();
        let seen = Arc::clone(&calls);
        let mut route = Route::new(Method::Get, "/x", move |_| seen.lock().unwrap().push("handler".to_owned()));
        route.before(|_| ApiError::forbidden("denied", "not you"));

        let outcome = route.execute(&mut request("/x", &[])).unwrap();
        assert_eq!(outcome.error().map(ApiError::status), Some(StatusCode::Forbidden));
        assert!(entries(&calls).is_empty());
    }

    #[test]
    fn fatal_errors_propagate() {
        let route = Route::new(Method::Get, "/x", |_| {
            Err::<(), _>(DispatchError::callback("database unreachable"))
        });
        let err = route.execute(&mut request("/x", &[])).unwrap_err();
        assert_eq!(err.to_string(), "callback failed: database unreachable");
    }

    #[test]
    fn require_var_failure_is_fatal() {
        let route = Route::new(Method::Get, "/items/{id}", |ctx| ctx.require_var("slug").cloned());
        let err = route.execute(&mut request("/items/1", &[("id", "1")])).unwrap_err();
        assert!(matches!(err, DispatchError::UnboundVariable { .. }));
    }

    // ── converters ────────────────────────────────────────────────────────────

    #[test]
    fn converters_run_before_hooks() {
        let calls = log();
        let seen = Arc::clone(&calls);
        let mut route = Route::new(Method::Get, "/items/{id}", |ctx| ctx.var("id").cloned());
        route
            .convert("id", |_, raw| {
                raw.as_str().and_then(|s| s.parse::<i64>().ok()).map(|n| n * 10)
            })
            .before(move |ctx| {
                seen.lock().unwrap().push(format!("{}", ctx.var("id").cloned().unwrap_or_default()));
            });

        let mut req = request("/items/4", &[("id", "4")]);
        let res = response(route.execute(&mut req).unwrap());

        assert_eq!(entries(&calls), vec!["40"]);
        assert_eq!(res.data(), &json!(40));
        assert_eq!(req.path_vars().get("id"), Some(&json!(40)));
    }

    #[test]
    fn converters_for_unbound_variables_are_ignored() {
        let mut route = Route::new(Method::Get, "/items", |_| ());
        route.convert("id", |_, _| "converted");

        let mut req = request("/items", &[("id", "raw")]);
        route.execute(&mut req).unwrap();
        assert_eq!(req.path_vars().get_str("id"), Some("raw"));
    }

    #[test]
    fn converter_can_read_the_request() {
        let mut route = Route::new(Method::Get, "/items/{id}", |ctx| ctx.var("id").cloned());
        route.convert("id", |ctx, raw| {
            json!({ "id": raw, "lang": ctx.request().header("accept-language") })
        });

        let mut req = request("/items/9", &[("id", "9")]).with_header("Accept-Language", "de");
        let res = response(route.execute(&mut req).unwrap());
        assert_eq!(res.data(), &json!({"id": "9", "lang": "de"}));
    }

    // ── accept_json ───────────────────────────────────────────────────────────

    #[test]
    fn json_body_is_parsed_when_accepted() {
        let mut route = Route::new(Method::Post, "/items", |ctx| {
            let body: Value = ctx.json()?;
            Ok::<_, DispatchError>(json!({ "echo": body["name"] }))
        });
        route.accept_json(true);

        let mut req = Request::new(Method::Post, "/items").with_body(r#"{"name":"lamp"}"#);
        let res = response(route.execute(&mut req).unwrap());
        assert_eq!(res.data(), &json!({"echo": "lamp"}));
        assert_eq!(req.json(), Some(&json!({"name": "lamp"})));
    }

    #[test]
    fn malformed_json_is_a_bad_request() {
        let calls = log();
        let seen = Arc::clone(&calls);
        let mut route = Route::new(Method::Post, "/items", move |_| seen.lock().unwrap().push("handler".to_owned()));
        route.accept_json(true);

        let mut req = Request::new(Method::Post, "/items").with_body("{nope");
        let outcome = route.execute(&mut req).unwrap();
        assert_eq!(outcome.error().map(ApiError::code), Some("invalid_json"));
        assert!(entries(&calls).is_empty());
    }

    #[test]
    fn body_is_left_alone_without_accept_json() {
        let route = Route::new(Method::Post, "/items", |_| ());
        let mut req = Request::new(Method::Post, "/items").with_body("{nope");
        assert!(!route.execute(&mut req).unwrap().is_error());
        assert!(req.json().is_none());
    }
}
