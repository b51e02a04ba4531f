//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! A chain holds handlers of *different* concrete types: the terminal
//! application handler, then one wrapper type per behavior. They are all
//! hidden behind the same trait object so that a behavior only ever sees
//! "the next handler", never its concrete type:
//!
//! ```text
//! handler_fn(|req, w| Box::pin(async move { … }))   ← user writes this
//!        ↓ Chain::new(handler)
//! Arc::new(FnHandler(f))                             ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn Handler>
//! behavior.wrap(next)                                 ← one Arc per layer
//!        ↓
//! handler.call(req, &mut writer)  at request time    ← one vtable call per layer
//! ```
//!
//! The writer is borrowed, not owned, for the duration of the call. That is
//! what lets a behavior decorate it, hand the decoration inward, and still
//! inspect the original once the inner handler returns.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Error;
use crate::request::Request;
use crate::response::ResponseWriter;

/// A heap-allocated, type-erased future borrowed from the handler and writer.
///
/// `Send` lets tokio move the in-flight request across worker threads.
pub type BoxFuture<'a, T = Result<(), Error>> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn Handler>;

/// Anything that can serve a request.
///
/// Handlers carry no per-request state: the same value is called concurrently
/// by every in-flight request, so whatever one invocation needs must live in
/// its own future.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, req: Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a>;
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn call<'a>(&'a self, req: Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        (**self).call(req, w)
    }
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn call<'a>(&'a self, req: Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        (**self).call(req, w)
    }
}

/// Adapts a closure into a [`Handler`].
///
/// The closure receives the request by value and the writer by mutable
/// borrow, and returns a boxed future tied to that borrow:
///
/// ```rust
/// use mantle::{handler_fn, ResponseWriter};
///
/// let hello = handler_fn(|_req, w| Box::pin(async move {
///     w.write(b"hello").await?;
///     Ok(())
/// }));
/// # let _ = hello;
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'a> Fn(Request, &'a mut dyn ResponseWriter) -> BoxFuture<'a> + Send + Sync + 'static,
{
    FnHandler(f)
}

/// Newtype produced by [`handler_fn`].
pub struct FnHandler<F>(F);

impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(Request, &'a mut dyn ResponseWriter) -> BoxFuture<'a> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, req: Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        (self.0)(req, w)
    }
}
