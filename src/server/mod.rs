//! Async TCP server using Tokio.
//!
//! Accepts TCP connections, parses HTTP/1.1 requests, and dispatches them
//! through a shared [`RouteTable`]. Connections are kept alive between
//! requests unless the client asks otherwise.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::host::RouteTable;
use crate::http::request::RequestError;
use crate::http::{Request, Response, StatusCode};
use crate::reply::ApiError;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

/// Serves a [`RouteTable`] over HTTP/1.1.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use routeweave::host::RouteTable;
/// use routeweave::router::Router;
/// use routeweave::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::new("hello/v1");
///     router.get("/greet/{name}", |ctx| {
///         format!("Hello, {}!", ctx.var_str("name").unwrap_or("stranger"))
///     });
///
///     let mut table = RouteTable::new();
///     router.register_all(&mut table)?;
///
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.serve(Arc::new(table)).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until the process ends, dispatching every request
    /// through `table`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn serve(self, table: Arc<RouteTable>) -> Result<(), ServerError> {
        info!(address = %self.local_addr, routes = table.len(), "routeweave listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let table = Arc::clone(&table);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, table).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Reads requests off one connection until the peer closes it or asks for
/// `Connection: close`.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    table: Arc<RouteTable>,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let bytes_read = stream.read_buf(&mut buf).await?;

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large, sending 413");
            let response = ApiError::new(
                StatusCode::PayloadTooLarge,
                "request_too_large",
                "Request entity too large.",
            )
            .into_response()
            .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            break;
        }

        let (mut request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => continue,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = ApiError::bad_request("bad_request", format!("Bad Request: {e}"))
                    .into_response()
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        let total_needed = body_offset + request.content_length().unwrap_or(0);
        if buf.len() < total_needed {
            continue;
        }

        let message = buf.split_to(total_needed).freeze();
        request.set_body(message.slice(body_offset..));

        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response: Response = table.dispatch(request).keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;
    use crate::router::Router;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    async fn start(router: Router) -> SocketAddr {
        init_tracing();
        let mut table = RouteTable::new();
        router.register_all(&mut table).unwrap();

        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.serve(Arc::new(table)));
        addr
    }

    async fn roundtrip(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    fn body(raw: &str) -> Value {
        let (_, body) = raw.split_once("\r\n\r\n").unwrap();
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn serves_registered_routes() {
        let mut router = Router::new("shop/v1");
        router
            .get("/items/{id}", |ctx| json!({ "id": ctx.var("id").cloned() }))
            .assert("id", r"\d+")
            .convert("id", |_, raw| raw.as_str().and_then(|s| s.parse::<u64>().ok()));

        let addr = start(router).await;

        let raw = roundtrip(
            addr,
            "GET /shop/v1/items/42 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(body(&raw), json!({ "id": 42 }));

        let raw = roundtrip(
            addr,
            "GET /shop/v1/items/abc HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(raw.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[tokio::test]
    async fn reads_the_json_body() {
        let mut router = Router::new("shop/v1");
        router
            .post("/items", |ctx| ctx.request().json().cloned())
            .accept_json(true);

        let addr = start(router).await;

        let payload = r#"{"name":"lamp"}"#;
        let raw = roundtrip(
            addr,
            &format!(
                "POST /shop/v1/items HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                payload.len()
            ),
        )
        .await;
        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(body(&raw), json!({ "name": "lamp" }));
    }

    #[tokio::test]
    async fn malformed_request_gets_400() {
        let addr = start(Router::new("api")).await;
        let raw = roundtrip(addr, "NOT A REQUEST\r\n\r\n").await;
        assert!(raw.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }
}
