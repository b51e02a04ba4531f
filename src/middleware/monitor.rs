//! Named-handler instrumentation.
//!
//! [`Monitor`] carries a handler name and an [`Instrument`], the hook a
//! metrics backend supplies. Wrapping delegates entirely to the instrument;
//! the monitor only passes the name through. [`Counters`] is a built-in,
//! in-process instrument.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use http::StatusCode;

use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::middleware::Behavior;
use crate::recorder::Recorder;
use crate::request::Request;
use crate::response::ResponseWriter;

/// Hook supplied by a metrics backend.
pub trait Instrument: Send + Sync + 'static {
    fn instrument(&self, handler_name: &str, next: BoxedHandler) -> BoxedHandler;
}

impl<I: Instrument + ?Sized> Instrument for Arc<I> {
    fn instrument(&self, handler_name: &str, next: BoxedHandler) -> BoxedHandler {
        (**self).instrument(handler_name, next)
    }
}

pub struct Monitor {
    name: String,
    instrument: Arc<dyn Instrument>,
}

impl Monitor {
    pub fn new(name: impl Into<String>, instrument: impl Instrument) -> Self {
        Self { name: name.into(), instrument: Arc::new(instrument) }
    }
}

impl Behavior for Monitor {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        self.instrument.instrument(&self.name, next)
    }
}

// ── Counters ──────────────────────────────────────────────────────────────────

/// Lock-free per-handler counters.
///
/// The counters for a name are resolved when the chain is composed; the
/// request path only touches atomics. Clones share the same registry.
#[derive(Clone, Default)]
pub struct Counters {
    registry: Arc<RwLock<HashMap<String, Arc<HandlerStats>>>>,
}

#[derive(Default)]
struct HandlerStats {
    requests: AtomicU64,
    in_flight: AtomicU64,
    errors: AtomicU64,
    latency_ns: AtomicU64,
    response_bytes: AtomicU64,
    /// Responses by status class, `[1xx, 2xx, 3xx, 4xx, 5xx]`.
    classes: [AtomicU64; 5],
}

/// Point-in-time copy of one handler's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub in_flight: u64,
    pub errors: u64,
    pub total_latency: Duration,
    pub response_bytes: u64,
    pub status_classes: [u64; 5],
}

impl StatsSnapshot {
    pub fn average_latency(&self) -> Duration {
        match u32::try_from(self.requests) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_latency / n,
            Err(_) => Duration::from_nanos(
                (self.total_latency.as_nanos() / u128::from(self.requests)) as u64,
            ),
        }
    }
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, handler_name: &str) -> Option<StatsSnapshot> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        let stats = registry.get(handler_name)?;
        Some(StatsSnapshot {
            requests: stats.requests.load(Ordering::Relaxed),
            in_flight: stats.in_flight.load(Ordering::Relaxed),
            errors: stats.errors.load(Ordering::Relaxed),
            total_latency: Duration::from_nanos(stats.latency_ns.load(Ordering::Relaxed)),
            response_bytes: stats.response_bytes.load(Ordering::Relaxed),
            status_classes: std::array::from_fn(|i| stats.classes[i].load(Ordering::Relaxed)),
        })
    }

    /// Names seen so far, sorted.
    pub fn handler_names(&self) -> Vec<String> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = registry.keys().cloned().collect();
        names.sort();
        names
    }

    fn stats_for(&self, name: &str) -> Arc<HandlerStats> {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(registry.entry(name.to_owned()).or_default())
    }
}

impl Instrument for Counters {
    fn instrument(&self, handler_name: &str, next: BoxedHandler) -> BoxedHandler {
        Arc::new(CountingHandler { stats: self.stats_for(handler_name), next })
    }
}

struct CountingHandler {
    stats: Arc<HandlerStats>,
    next: BoxedHandler,
}

impl Handler for CountingHandler {
    fn call<'a>(&'a self, req: Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        Box::pin(async move {
            let stats = &self.stats;
            stats.requests.fetch_add(1, Ordering::Relaxed);
            let _in_flight = InFlight::enter(stats);

            let mut rec = Recorder::new(w);
            let result = self.next.call(req, &mut rec).await;

            stats.response_bytes.fetch_add(rec.bytes_written(), Ordering::Relaxed);
            if result.is_err() {
                stats.errors.fetch_add(1, Ordering::Relaxed);
            } else if let Some(class) = status_class(rec.status()) {
                stats.classes[class].fetch_add(1, Ordering::Relaxed);
            }
            result
        })
    }
}

/// Holds one unit of the in-flight gauge and times the request. Released on
/// drop, so a panicking or cancelled handler is accounted for too.
struct InFlight<'a> {
    stats: &'a HandlerStats,
    start: Instant,
}

impl<'a> InFlight<'a> {
    fn enter(stats: &'a HandlerStats) -> Self {
        stats.in_flight.fetch_add(1, Ordering::Relaxed);
        Self { stats, start: Instant::now() }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let elapsed = u64::try_from(self.start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.stats.latency_ns.fetch_add(elapsed, Ordering::Relaxed);
        self.stats.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

fn status_class(status: StatusCode) -> Option<usize> {
    match status.as_u16() / 100 {
        c @ 1..=5 => Some(usize::from(c - 1)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes() {
        assert_eq!(status_class(StatusCode::CONTINUE), Some(0));
        assert_eq!(status_class(StatusCode::OK), Some(1));
        assert_eq!(status_class(StatusCode::NOT_FOUND), Some(3));
        assert_eq!(status_class(StatusCode::BAD_GATEWAY), Some(4));
    }

    #[test]
    fn average_of_nothing_is_zero() {
        assert_eq!(StatsSnapshot::default().average_latency(), Duration::ZERO);
    }

    #[test]
    fn unknown_name_has_no_snapshot() {
        assert!(Counters::new().snapshot("missing").is_none());
    }
}
