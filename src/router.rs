//! Radix-tree request router.
//!
//! A terminal [`Handler`] that picks one of several handlers by method and
//! path. One tree per HTTP method, O(path-length) lookup. Unmatched requests
//! get a bare `404 Not Found`.

use std::collections::HashMap;
use std::sync::Arc;

use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::request::Request;
use crate::response::ResponseWriter;

/// The application router.
///
/// Build it once at startup and use it as the terminal handler of a
/// [`Chain`](crate::Chain). Each [`Router::on`] call returns `self` so
/// registrations chain naturally.
#[derive(Default)]
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, Arc::new(handler))
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }
}

impl Handler for Router {
    fn call<'a>(&'a self, mut req: Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        Box::pin(async move {
            match self.lookup(req.method(), req.path()) {
                Some((handler, params)) => {
                    req.params = params;
                    handler.call(req, w).await
                }
                None => w.write_header(StatusCode::NOT_FOUND),
            }
        })
    }
}
