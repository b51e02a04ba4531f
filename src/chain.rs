//! Composing behaviors around a terminal handler.
//!
//! ```text
//! Chain::new(terminal).with(A).with(B).with(C)
//!
//!   request  ──▶ C ──▶ B ──▶ A ──▶ terminal
//!   response ◀── C ◀── B ◀── A ◀──┘
//! ```
//!
//! The last behavior added is the outermost wrapper, so it sees the request
//! first and finishes last.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::middleware::Behavior;
use crate::request::Request;
use crate::response::ResponseWriter;

/// An ordered list of [`Behavior`]s around one terminal [`Handler`].
///
/// The composed handler is built on the first dispatch and reused after
/// that. [`add`](Chain::add) needs `&mut self`, so a chain that is already
/// serving (shared behind an `Arc` by the server) cannot change underneath
/// in-flight requests; mutation is a setup-time operation.
///
/// The chain adds no error handling of its own. Errors and panics from any
/// layer travel unmodified to whoever called [`dispatch`](Chain::dispatch).
pub struct Chain {
    terminal: BoxedHandler,
    behaviors: Vec<Arc<dyn Behavior>>,
    composed: OnceLock<BoxedHandler>,
}

impl Chain {
    pub fn new(terminal: impl Handler) -> Self {
        Self {
            terminal: Arc::new(terminal),
            behaviors: Vec::new(),
            composed: OnceLock::new(),
        }
    }

    /// `Chain::with_behaviors(raw, [a, b, c])` executes `c → b → a → raw`.
    pub fn with_behaviors<I>(terminal: impl Handler, behaviors: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Behavior>>,
    {
        let mut chain = Self::new(terminal);
        chain.behaviors.extend(behaviors);
        chain
    }

    /// Appends `behavior` as the new outermost wrapper.
    pub fn add(&mut self, behavior: impl Behavior) -> &mut Self {
        self.behaviors.push(Arc::new(behavior));
        self.composed = OnceLock::new();
        self
    }

    /// Builder form of [`add`](Chain::add).
    pub fn with(mut self, behavior: impl Behavior) -> Self {
        self.add(behavior);
        self
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    /// Runs `req` through every behavior and the terminal handler.
    pub async fn dispatch(&self, req: Request, w: &mut dyn ResponseWriter) -> Result<(), crate::Error> {
        self.handler().call(req, w).await
    }

    /// The composed handler: the terminal folded inside every behavior in
    /// insertion order. With no behaviors this is the terminal itself.
    pub fn handler(&self) -> &BoxedHandler {
        self.composed.get_or_init(|| {
            self.behaviors
                .iter()
                .fold(Arc::clone(&self.terminal), |next, behavior| behavior.wrap(next))
        })
    }
}

impl Handler for Chain {
    fn call<'a>(&'a self, req: Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        self.handler().call(req, w)
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("behaviors", &self.behaviors.len())
            .field("composed", &self.composed.get().is_some())
            .finish()
    }
}
