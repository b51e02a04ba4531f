//! # mantle
//!
//! Middleware chains for hyper-based HTTP services. Independently written
//! behaviors (logging, compression, tracing, metrics) wrap one terminal
//! handler without knowing about each other.
//!
//! ## The contract
//!
//! A [`Behavior`](middleware::Behavior) takes the next [`Handler`] and returns
//! a new one. A [`Chain`] folds its behaviors around the terminal handler in
//! the order they were added, so the last one added runs first:
//!
//! ```text
//! Chain::new(app).with(Log).with(Gzip).with(Trace)
//!
//!   Trace ▶ Gzip ▶ Log ▶ app     on the way in
//!   Trace ◀ Gzip ◀ Log ◀ app     on the way out
//! ```
//!
//! Handlers write their response through a borrowed
//! [`ResponseWriter`]. A behavior may hand a decorated writer inward (gzip
//! compresses through one, trace measures through one); decorators forward
//! what they do not intercept, so they stack.
//!
//! Request-scoped values produced by one behavior and needed by another
//! travel in the request's [`Context`], not in the writer.
//!
//! What mantle leaves to others:
//!
//! - **Fault recovery**: the chain propagates every error and panic; the
//!   hosting [`Server`] turns them into a `500` or a reset connection
//! - **Metrics storage and export**: [`Instrument`](middleware::Instrument)
//!   is a hook, the backend is yours
//! - **Trace export**: events go to a [`Collector`](middleware::Collector)
//!   of your choosing
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::Method;
//! use mantle::middleware::{trace::LogCollector, Gzip, Log, Trace};
//! use mantle::{handler_fn, Chain, ResponseWriter, Router, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new().on(Method::GET, "/hello", handler_fn(|_req, w| {
//!         Box::pin(async move {
//!             w.write(b"hello").await?;
//!             Ok(())
//!         })
//!     }));
//!
//!     let chain = Chain::new(app)
//!         .with(Log::new())
//!         .with(Gzip::new())
//!         .with(Trace::new(LogCollector));
//!
//!     Server::bind("0.0.0.0:3000").serve(chain).await.unwrap();
//! }
//! ```

mod chain;
mod context;
mod error;
mod handler;
mod recorder;
mod request;
mod response;
mod router;
mod server;

pub mod middleware;
pub mod sniff;

pub use chain::Chain;
pub use context::Context;
pub use error::{BoxError, Error};
pub use handler::{handler_fn, BoxFuture, BoxedHandler, FnHandler, Handler};
pub use recorder::Recorder;
pub use request::Request;
pub use response::{BufferedWriter, ResponseBody, ResponseWriter, StreamWriter};
pub use router::Router;
pub use server::Server;
