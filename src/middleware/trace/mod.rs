//! Span propagation and per-request server events.
//!
//! For every request the trace behavior:
//!
//! 1. picks the span: inbound `span-id`, else a child of `parent-span-id`,
//!    else a new root;
//! 2. stores the [`SpanId`] in the request [`Context`](crate::Context), where
//!    anything nested inside can read it with `req.context().get::<SpanId>()`;
//! 3. records status and body size through a [`Recorder`];
//! 4. echoes the span on the `span-id` response header, both before the
//!    handler runs (so a streamed head carries it) and after it returns;
//! 5. hands a [`ServerEvent`] with redacted header summaries to its
//!    [`Collector`] on a detached task.
//!
//! Collection never touches the response. A slow or failing collector costs a
//! log line, not latency.

mod collector;
mod redact;
mod span;

use std::sync::Arc;
use std::time::SystemTime;

use http::header::{HeaderName, HeaderValue, HOST};
use http::HeaderMap;
use tracing::warn;

use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::middleware::Behavior;
use crate::recorder::Recorder;
use crate::request::Request;
use crate::response::ResponseWriter;

pub use collector::{ChannelCollector, Collector, LogCollector, RequestInfo, ResponseInfo, ServerEvent};
pub use redact::{canonical_header_key, Redaction, REDACTED};
pub use span::{ParseSpanIdError, SpanId, PARENT_SPAN_ID_HEADER, SPAN_ID_HEADER};

/// The trace behavior. Redacts [`Redaction::default`] unless configured
/// otherwise.
#[derive(Clone)]
pub struct Trace {
    collector: Arc<dyn Collector>,
    redaction: Arc<Redaction>,
}

impl Trace {
    pub fn new(collector: impl Collector) -> Self {
        Self {
            collector: Arc::new(collector),
            redaction: Arc::new(Redaction::default()),
        }
    }

    pub fn redaction(mut self, redaction: Redaction) -> Self {
        self.redaction = Arc::new(redaction);
        self
    }
}

impl Behavior for Trace {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(TraceHandler {
            collector: Arc::clone(&self.collector),
            redaction: Arc::clone(&self.redaction),
            next,
        })
    }
}

struct TraceHandler {
    collector: Arc<dyn Collector>,
    redaction: Arc<Redaction>,
    next: BoxedHandler,
}

impl Handler for TraceHandler {
    fn call<'a>(&'a self, mut req: Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        Box::pin(async move {
            let server_recv = SystemTime::now();
            let span = SpanId::from_headers(req.headers()).unwrap_or_else(SpanId::new_root);
            req.context_mut().insert(span);

            let route = req.path().to_owned();
            let request = request_info(&req, &self.redaction);

            let echo = HeaderValue::try_from(span.to_string()).ok();
            set_span_header(w.headers_mut(), echo.as_ref());

            let mut rec = Recorder::new(w);
            let result = self.next.call(req, &mut rec).await;
            let status = rec.status();
            let bytes = rec.bytes_written();
            let w = rec.into_inner();

            set_span_header(w.headers_mut(), echo.as_ref());

            let event = ServerEvent {
                span,
                route,
                request,
                response: ResponseInfo {
                    status: status.as_u16(),
                    content_length: bytes,
                    headers: self.redaction.summarize(w.headers(), w.trailers()),
                },
                server_recv,
                server_send: SystemTime::now(),
            };
            emit(Arc::clone(&self.collector), event);

            result
        })
    }
}

fn set_span_header(headers: &mut HeaderMap, value: Option<&HeaderValue>) {
    if let Some(value) = value {
        headers.insert(HeaderName::from_static(SPAN_ID_HEADER), value.clone());
    }
}

fn request_info(req: &Request, redaction: &Redaction) -> RequestInfo {
    let host = req
        .header(HOST.as_str())
        .map(str::to_owned)
        .or_else(|| req.uri().authority().map(|a| a.to_string()));
    RequestInfo {
        method: req.method().to_string(),
        uri: req.request_uri().to_owned(),
        proto: format!("{:?}", req.version()),
        host,
        remote_addr: req.remote_addr(),
        content_length: req.body().len() as u64,
        headers: redaction.summarize(req.headers(), &HeaderMap::new()),
    }
}

/// Fire-and-forget delivery. Outside a tokio runtime the event is dropped.
fn emit(collector: Arc<dyn Collector>, event: ServerEvent) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(span = %event.span, "no runtime to deliver trace event, dropped");
        return;
    };
    runtime.spawn(async move {
        if let Err(e) = collector.collect(event).await {
            warn!(error = %e, "trace collector failed");
        }
    });
}
