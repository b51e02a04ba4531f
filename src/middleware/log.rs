//! Request-line logging.
//!
//! Emits one `tracing` event per request with the method and request URI,
//! before the request goes further in. Where the event ends up is the
//! subscriber's business.

use std::sync::Arc;

use tracing::Level;

use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::middleware::Behavior;
use crate::request::Request;
use crate::response::ResponseWriter;

/// Logs `METHOD /request-uri` for every request. Defaults to `DEBUG`.
#[derive(Clone, Copy, Debug)]
pub struct Log {
    level: Level,
}

impl Log {
    pub fn new() -> Self {
        Self { level: Level::DEBUG }
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }
}

impl Default for Log {
    fn default() -> Self { Self::new() }
}

impl Behavior for Log {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(LogHandler { level: self.level, next })
    }
}

struct LogHandler {
    level: Level,
    next: BoxedHandler,
}

impl Handler for LogHandler {
    fn call<'a>(&'a self, req: Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        request_line(self.level, &req);
        self.next.call(req, w)
    }
}

// `tracing` needs the level at compile time.
fn request_line(level: Level, req: &Request) {
    let method = req.method().as_str();
    let uri = req.request_uri();
    if level == Level::ERROR {
        tracing::error!(method, uri, "request");
    } else if level == Level::WARN {
        tracing::warn!(method, uri, "request");
    } else if level == Level::INFO {
        tracing::info!(method, uri, "request");
    } else if level == Level::DEBUG {
        tracing::debug!(method, uri, "request");
    } else {
        tracing::trace!(method, uri, "request");
    }
}
