//! # routeweave
//!
//! Declarative HTTP route registration for a host-owned URL table.
//!
//! Routes are declared on a namespaced [`Router`] with a path template
//! (`/items/{id}`), an optional regex assert per placeholder, value
//! converters, and ordered before/after hooks. [`Router::register_all`]
//! compiles each template into a regex fragment and hands it to a
//! [`HostRouter`] together with a dispatch closure. On every request the
//! pipeline runs the converters, the before-hooks, the handler, and the
//! after-hooks against one shared [`Context`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use routeweave::reply::ApiError;
//! use routeweave::{RouteTable, Router, Server};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new("shop/v1");
//!
//!     router.before(|ctx| {
//!         if ctx.request().header("x-api-key").is_none() {
//!             return Err(ApiError::forbidden("no_key", "An API key is required."));
//!         }
//!         Ok(())
//!     });
//!
//!     router
//!         .get("/items/{id}", |ctx| json!({ "id": ctx.var("id").cloned() }))
//!         .assert("id", r"\d+")
//!         .convert("id", |_, raw| raw.as_str().and_then(|s| s.parse::<u64>().ok()));
//!
//!     let mut table = RouteTable::new();
//!     router.register_all(&mut table)?;
//!
//!     Server::bind("127.0.0.1:8080").await?.serve(Arc::new(table)).await?;
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod etag;
pub mod host;
pub mod http;
pub mod pattern;
pub mod reply;
pub mod route;
pub mod router;
pub mod server;

pub use context::Context;
pub use host::{HostRouter, RouteRegistration, RouteTable};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use pattern::{CompiledPattern, PatternError};
pub use reply::{ApiError, IntoReply, Outcome, Reply};
pub use route::{DispatchError, Route};
pub use router::{RegisterError, Router, RouterOptions};
pub use server::{Server, ServerError};
