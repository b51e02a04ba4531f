//! Middleware layer.
//!
//! A [`Behavior`] wraps the next handler and returns a new one. It is the
//! right place for cross-cutting concerns: request logging, compression,
//! span propagation, metrics.
//!
//! # The wrap contract
//!
//! Every handler returned by [`Behavior::wrap`] must, per invocation, either
//! call `next` exactly once or answer the request itself without calling it.
//! Calling `next` twice, or not at all while expecting downstream effects, is
//! a programming error; nothing checks for it.
//!
//! Behaviors are built once and then shared by every in-flight request.
//! Per-request state lives in the returned handler's future, never in the
//! behavior.
//!
//! A behavior that decorates the writer must forward every call it does not
//! intercept to the writer it was given, so an outer decoration stays intact
//! underneath an inner one.
//!
//! Built-in behaviors:
//! - [`log`]: the request line, as a `tracing` event
//! - [`gzip`]: negotiated gzip compression of the response body
//! - [`trace`]: span-id propagation and per-request server events
//! - [`monitor`]: named-handler instrumentation

pub mod gzip;
pub mod log;
pub mod monitor;
pub mod trace;

use crate::handler::BoxedHandler;

pub use gzip::Gzip;
pub use log::Log;
pub use monitor::{Counters, Instrument, Monitor};
pub use trace::{Collector, SpanId, Trace};

/// Something that wraps a handler into a new handler.
pub trait Behavior: Send + Sync + 'static {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}

impl<B: Behavior + ?Sized> Behavior for std::sync::Arc<B> {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        (**self).wrap(next)
    }
}

/// Adapts a plain `Fn(BoxedHandler) -> BoxedHandler` into a [`Behavior`].
///
/// ```rust
/// use std::sync::Arc;
/// use mantle::{handler_fn, Chain, Handler, ResponseWriter};
/// use mantle::middleware::behavior_fn;
///
/// let powered_by = behavior_fn(|next| {
///     Arc::new(handler_fn(move |req, w| {
///         let next = Arc::clone(&next);
///         Box::pin(async move {
///             w.headers_mut().insert("x-powered-by", "mantle".parse().unwrap());
///             next.call(req, w).await
///         })
///     }))
/// });
///
/// let app = handler_fn(|_req, w| Box::pin(async move {
///     w.write(b"ok").await?;
///     Ok(())
/// }));
/// let chain = Chain::new(app).with(powered_by);
/// # let _ = chain;
/// ```
pub fn behavior_fn<F>(f: F) -> BehaviorFn<F>
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    BehaviorFn(f)
}

/// Newtype produced by [`behavior_fn`].
pub struct BehaviorFn<F>(F);

impl<F> Behavior for BehaviorFn<F>
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        (self.0)(next)
    }
}
