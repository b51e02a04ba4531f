//! Unified error type.

/// Boxed error accepted from application handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by mantle's fallible operations.
///
/// Application-level outcomes (404, 422, etc.) are written to the
/// [`ResponseWriter`](crate::ResponseWriter) as ordinary responses. `Error`
/// surfaces faults: a peer that went away mid-stream, a compressor that failed
/// to close, a handler that gave up. The chain never swallows one of these;
/// whatever a handler returns reaches the hosting server unchanged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying I/O failure, including compression stream failures.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The client disconnected; the response body can no longer be delivered.
    #[error("response stream closed by peer")]
    Closed,

    /// A write was attempted after the response was completed.
    #[error("response already finished")]
    Finished,

    /// Transport-level failure reported by hyper.
    #[error("hyper: {0}")]
    Hyper(#[from] hyper::Error),

    /// A trace collector rejected an event.
    #[error("collector: {0}")]
    Collect(String),

    /// Application failure returned by a handler.
    #[error("handler: {0}")]
    Handler(#[source] BoxError),
}

impl Error {
    /// Wraps an arbitrary application error.
    pub fn handler(e: impl Into<BoxError>) -> Self {
        Self::Handler(e.into())
    }
}
