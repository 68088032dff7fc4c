//! The host side of registration: the URL table that owns matching.
//!
//! A [`Router`](crate::router::Router) never matches URLs itself. It hands
//! each route to a [`HostRouter`] as a [`RouteRegistration`]: the namespace,
//! the compiled pattern, a permission check, and a dispatch closure that
//! runs the route's pipeline. [`RouteTable`] is the in-process host used by
//! the bundled [`Server`](crate::server::Server).

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, error};

use crate::http::{Method, Request, Response, StatusCode};
use crate::pattern::CompiledPattern;
use crate::reply::{ApiError, Outcome};
use crate::route::DispatchError;
use crate::router::{RegisterError, namespace_prefix};

/// Runs a route's pipeline against a request whose path variables are filled.
pub type Dispatch = Arc<dyn Fn(&mut Request) -> Result<Outcome, DispatchError> + Send + Sync>;

/// Decides whether a matched request may be dispatched.
pub type Permission = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// A permission check that admits every request.
pub fn allow_all() -> Permission {
    Arc::new(|_| true)
}

/// Everything a host needs to serve one route.
pub struct RouteRegistration {
    pub namespace: String,
    pub method: Method,
    pub pattern: CompiledPattern,
    pub permission: Permission,
    pub dispatch: Dispatch,
}

impl fmt::Debug for RouteRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteRegistration")
            .field("namespace", &self.namespace)
            .field("method", &self.method)
            .field("pattern", &self.pattern.pattern())
            .finish_non_exhaustive()
    }
}

/// Something that accepts route registrations.
pub trait HostRouter {
    fn register_route(&mut self, registration: RouteRegistration) -> Result<(), RegisterError>;
}

struct Entry {
    method: Method,
    regex: Regex,
    pattern: CompiledPattern,
    permission: Permission,
    dispatch: Dispatch,
}

/// An ordered table of registered routes; the first match wins.
///
/// Unmatched paths get `404 no_route`, paths that match only under other
/// methods get `405 method_not_allowed`, denied requests get `403 forbidden`,
/// and fatal dispatch errors are logged and answered with
/// `500 internal_error`.
#[derive(Default)]
pub struct RouteTable {
    entries: Vec<Entry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Route `request` and produce the response to send.
    pub fn dispatch(&self, mut request: Request) -> Response {
        let mut path_matched = false;

        for entry in &self.entries {
            let Some(captures) = entry.regex.captures(request.path()) else {
                continue;
            };
            if entry.method != *request.method() {
                path_matched = true;
                continue;
            }

            let vars: Vec<(String, String)> = entry
                .pattern
                .extract(&captures)
                .into_iter()
                .map(|(name, value)| (name.to_owned(), value.to_owned()))
                .collect();
            for (name, value) in vars {
                request.path_vars_mut().insert(name, value);
            }

            if !(entry.permission)(&request) {
                debug!(path = %request.path(), "permission denied");
                return ApiError::forbidden("forbidden", "Sorry, you are not allowed to do that.")
                    .into_response();
            }

            return match (entry.dispatch)(&mut request) {
                Ok(outcome) => outcome.into_response(),
                Err(e) => {
                    error!(
                        method = %request.method(),
                        path = %request.path(),
                        error = %e,
                        "route dispatch failed"
                    );
                    ApiError::new(
                        StatusCode::InternalServerError,
                        "internal_error",
                        "The route failed to produce a response.",
                    )
                    .into_response()
                }
            };
        }

        if path_matched {
            ApiError::new(
                StatusCode::MethodNotAllowed,
                "method_not_allowed",
                "No route was found matching the URL and request method.",
            )
            .into_response()
        } else {
            ApiError::not_found("no_route", "No route was found matching the URL and request method.")
                .into_response()
        }
    }
}

impl HostRouter for RouteTable {
    fn register_route(&mut self, registration: RouteRegistration) -> Result<(), RegisterError> {
        let regex = registration
            .pattern
            .regex(&namespace_prefix(&registration.namespace))?;

        debug!(method = %registration.method, regex = %regex.as_str(), "route added to table");

        self.entries.push(Entry {
            method: registration.method,
            regex,
            pattern: registration.pattern,
            permission: registration.permission,
            dispatch: registration.dispatch,
        });
        Ok(())
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.entries
                    .iter()
                    .map(|e| format!("{} {}", e.method, e.regex.as_str())),
            )
            .finish()
    }
}
