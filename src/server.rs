//! HTTP server and graceful shutdown.
//!
//! The server hosts one [`Handler`], normally a [`Chain`](crate::Chain), and
//! is where faults from it end up. The chain does not recover from anything;
//! the server does:
//!
//! | Fault | Client sees |
//! |---|---|
//! | handler error before the head is committed | `500`, empty body |
//! | handler error after commit | connection reset mid-body |
//! | handler panic before commit | `500`, empty body |
//! | handler panic after commit | connection reset mid-body |
//!
//! A body is never presented as complete when it was cut short.
//!
//! # Shutdown
//!
//! [`Server::serve`] stops on SIGTERM or Ctrl-C. The listener stops
//! accepting at once; connections already open are drained before `serve`
//! returns. Under Kubernetes this fits inside the pod's termination grace
//! period as long as in-flight requests are short.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;
use crate::response::{self, ResponseBody};

enum Listen {
    Addr(SocketAddr),
    Listener(TcpListener),
}

/// The HTTP server.
pub struct Server {
    listen: Listen,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use mantle::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self { listen: Listen::Addr(addr) }
    }

    /// Serves on an already bound listener.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { listen: Listen::Listener(listener) }
    }

    /// The bound address, once known.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listen {
            Listen::Addr(addr) => Some(*addr),
            Listen::Listener(l) => l.local_addr().ok(),
        }
    }

    /// Starts accepting connections and dispatching them through `handler`.
    ///
    /// Returns once a shutdown signal arrived and every open connection has
    /// finished.
    pub async fn serve(self, handler: impl Handler) -> Result<(), Error> {
        self.serve_with_shutdown(handler, shutdown_signal()).await
    }

    /// Like [`serve`](Server::serve), stopping when `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, handler: impl Handler, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let listener = match self.listen {
            Listen::Addr(addr) => TcpListener::bind(addr).await?,
            Listen::Listener(l) => l,
        };
        let local = listener.local_addr()?;

        // One Arc for the whole server; every request clones it.
        let handler: BoxedHandler = Arc::new(handler);

        info!(addr = %local, "mantle listening");

        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Check shutdown first so a SIGTERM immediately stops
                // accepting new connections, even if more are queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let handler = Arc::clone(&handler);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let handler = Arc::clone(&handler);
                            async move { dispatch(handler, req, remote_addr).await }
                        });

                        // HTTP/1.1 or HTTP/2, whatever the client negotiates.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connections.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("mantle stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through `handler` and returns as soon as the head is
/// committed; the body keeps streaming from the handler task.
async fn dispatch(
    handler: BoxedHandler,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<ResponseBody>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(peer = %remote_addr, "failed to read request body: {e}");
            return Ok(bare(http::StatusCode::BAD_REQUEST));
        }
    };
    let request = Request::from_parts(parts, body, remote_addr);

    let (mut writer, head, body) = response::channel();
    tokio::spawn(async move {
        match handler.call(request, &mut writer).await {
            Ok(()) => {
                if let Err(e) = writer.finish().await {
                    debug!(peer = %remote_addr, "response not completed: {e}");
                }
            }
            Err(e) => {
                error!(peer = %remote_addr, "handler failed: {e}");
                writer.abort(e).await;
            }
        }
    });

    match head.await {
        Ok(head) => Ok(head.into_response(body)),
        Err(_) => {
            error!(peer = %remote_addr, "handler panicked before committing a response");
            Ok(bare(http::StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

fn bare(status: http::StatusCode) -> http::Response<ResponseBody> {
    let mut res = http::Response::new(ResponseBody::empty());
    *res.status_mut() = status;
    res
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// First of SIGTERM and Ctrl-C. Ctrl-C only off Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    // `pending()` never resolves, which disables the SIGTERM arm off Unix.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
