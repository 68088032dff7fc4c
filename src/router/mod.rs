//! Namespaced route collections and their registration with a host.
//!
//! A [`Router`] owns the routes declared under one namespace (`shop/v1`),
//! the hooks that apply to all of them, and the router [`RouterOptions`].
//! Nothing is matched here: [`Router::register_all`] hands each route's
//! compiled pattern and a dispatch closure to a [`HostRouter`], which owns
//! the URL table.
//!
//! ```rust
//! use routeweave::host::RouteTable;
//! use routeweave::http::{Method, Request, StatusCode};
//! use routeweave::router::Router;
//! use serde_json::json;
//!
//! let mut router = Router::new("/shop/v1/");
//! router
//!     .get("/items/{id}", |ctx| json!({ "id": ctx.var("id").cloned() }))
//!     .assert("id", r"\d+");
//!
//! let mut table = RouteTable::new();
//! router.register_all(&mut table).unwrap();
//!
//! let response = table.dispatch(Request::new(Method::Get, "/shop/v1/items/12"));
//! assert_eq!(response.data(), &json!({ "id": "12" }));
//!
//! let response = table.dispatch(Request::new(Method::Get, "/shop/v1/items/abc"));
//! assert_eq!(response.status(), StatusCode::NotFound);
//! ```

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::context::Context;
use crate::etag;
use crate::host::{Dispatch, HostRouter, RouteRegistration, allow_all};
use crate::http::{Method, Request};
use crate::pattern::PatternError;
use crate::reply::{IntoReply, Outcome};
use crate::route::{DispatchError, Hook, Route, erase};

/// Errors raised while handing routes to a host.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("host rejected {method} {path}: {reason}")]
    Host {
        method: Method,
        path: String,
        reason: String,
    },
}

/// Router configuration.
///
/// Deserializes from an options mapping; missing keys take their defaults
/// and unknown keys are ignored.
///
/// ```rust
/// use routeweave::router::RouterOptions;
/// use serde_json::json;
///
/// let options = RouterOptions::from_value(json!({ "etag": true })).unwrap();
/// assert!(options.etag);
/// assert!(!RouterOptions::default().etag);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RouterOptions {
    /// Tag successful `GET` responses and answer matching revalidations with `304`.
    pub etag: bool,
}

impl RouterOptions {
    /// Read options from a JSON mapping. `null` yields the defaults.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
    }
}

/// An ordered collection of routes sharing a namespace, hooks, and options.
pub struct Router {
    namespace: String,
    routes: Vec<Route>,
    before: Vec<Hook>,
    after: Vec<Hook>,
    options: RouterOptions,
}

impl Router {
    /// Create a router for `namespace`; surrounding slashes are trimmed.
    pub fn new(namespace: impl AsRef<str>) -> Self {
        Self::with_options(namespace, RouterOptions::default())
    }

    pub fn with_options(namespace: impl AsRef<str>, options: RouterOptions) -> Self {
        Self {
            namespace: namespace.as_ref().trim_matches('/').to_owned(),
            routes: Vec::new(),
            before: Vec::new(),
            after: Vec::new(),
            options,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The literal path prefix routes are served under: `/{namespace}`, or
    /// nothing for the empty namespace.
    pub fn prefix(&self) -> String {
        namespace_prefix(&self.namespace)
    }

    pub fn options(&self) -> RouterOptions {
        self.options
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn get<F, R>(&mut self, path: &str, handler: F) -> &mut Route
    where
        F: Fn(&mut Context<'_>) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.route(Method::Get, path, handler)
    }

    pub fn post<F, R>(&mut self, path: &str, handler: F) -> &mut Route
    where
        F: Fn(&mut Context<'_>) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.route(Method::Post, path, handler)
    }

    pub fn put<F, R>(&mut self, path: &str, handler: F) -> &mut Route
    where
        F: Fn(&mut Context<'_>) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.route(Method::Put, path, handler)
    }

    pub fn patch<F, R>(&mut self, path: &str, handler: F) -> &mut Route
    where
        F: Fn(&mut Context<'_>) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.route(Method::Patch, path, handler)
    }

    pub fn delete<F, R>(&mut self, path: &str, handler: F) -> &mut Route
    where
        F: Fn(&mut Context<'_>) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.route(Method::Delete, path, handler)
    }

    /// Add a route for any method, including ones without a dedicated factory.
    pub fn route<F, R>(&mut self, method: impl Into<Method>, path: &str, handler: F) -> &mut Route
    where
        F: Fn(&mut Context<'_>) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        let index = self.routes.len();
        self.routes.push(Route::new(method, path, handler));
        &mut self.routes[index]
    }

    /// Add a hook that runs before every route's own before-hooks.
    pub fn before<F, R>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut Context<'_>) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.before.push(erase(hook));
        self
    }

    /// Add a hook that runs before every route's own after-hooks.
    pub fn after<F, R>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut Context<'_>) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.after.push(erase(hook));
        self
    }

    /// Hand every route to `host`, in declaration order.
    ///
    /// Each route's effective hooks are composed here (router hooks, then the
    /// route's own) into the dispatch closure; the routes themselves are not
    /// modified, so registering again yields identical pipelines.
    ///
    /// Returns the number of routes registered.
    ///
    /// # Errors
    ///
    /// - [`RegisterError::Pattern`]: a template or assert does not compile.
    /// - [`RegisterError::Host`]: the host refused a registration.
    pub fn register_all<H>(&self, host: &mut H) -> Result<usize, RegisterError>
    where
        H: HostRouter + ?Sized,
    {
        let prefix = self.prefix();

        for route in &self.routes {
            let pattern = route.compiled()?.clone();
            pattern.regex(&prefix)?;

            let pipeline = Arc::new(Pipeline {
                before: self.before.iter().chain(route.before_hooks()).cloned().collect(),
                after: self.after.iter().chain(route.after_hooks()).cloned().collect(),
                route: route.clone(),
                etag: self.options.etag,
            });
            let dispatch: Dispatch = Arc::new(move |request: &mut Request| pipeline.dispatch(request));

            debug!(
                namespace = %self.namespace,
                method = %route.method(),
                pattern = %pattern.pattern(),
                "registering route"
            );

            host.register_route(RouteRegistration {
                namespace: self.namespace.clone(),
                method: route.method().clone(),
                pattern,
                permission: allow_all(),
                dispatch,
            })?;
        }

        Ok(self.routes.len())
    }
}

pub(crate) fn namespace_prefix(namespace: &str) -> String {
    if namespace.is_empty() {
        String::new()
    } else {
        format!("/{namespace}")
    }
}

// A route frozen together with its effective hook lists.
struct Pipeline {
    route: Route,
    before: Vec<Hook>,
    after: Vec<Hook>,
    etag: bool,
}

impl Pipeline {
    fn dispatch(&self, request: &mut Request) -> Result<Outcome, DispatchError> {
        let mut outcome = self.route.run(request, &self.before, &self.after)?;
        if self.etag {
            if let Outcome::Response(response) = &mut outcome {
                etag::decorate(request, response);
            }
        }
        Ok(outcome)
    }
}
