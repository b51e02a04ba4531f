//! Minimal mantle example: a router wrapped in logging, compression,
//! metrics and tracing.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/users/42
//!   curl -i --compressed http://localhost:3000/users/42
//!   curl -i -H 'span-id: 0000000000000001/0000000000000002' http://localhost:3000/users/42
//!   curl -i http://localhost:3000/metrics

use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, StatusCode};
use mantle::middleware::trace::LogCollector;
use mantle::middleware::{Counters, Gzip, Log, Monitor, SpanId, Trace};
use mantle::{handler_fn, Chain, ResponseWriter, Router, Server};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let counters = Counters::new();
    let metrics = counters.clone();

    let app = Router::new()
        // GET /users/{id}
        .on(Method::GET, "/users/{id}", handler_fn(|req, w| Box::pin(async move {
            let id = req.param("id").unwrap_or("unknown");
            // Set by Trace, which runs further out.
            let span = req.context().get::<SpanId>().map(SpanId::to_string).unwrap_or_default();
            w.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            w.write(format!(r#"{{"id":"{id}","span":"{span}"}}"#).as_bytes()).await?;
            Ok(())
        })))
        // DELETE /users/{id} → 204 No Content
        .on(Method::DELETE, "/users/{id}", handler_fn(|_req, w| Box::pin(async move {
            w.write_header(StatusCode::NO_CONTENT)
        })))
        // GET /metrics, plain-text dump of the in-process counters
        .on(Method::GET, "/metrics", handler_fn(move |_req, w| {
            let metrics = metrics.clone();
            Box::pin(async move {
                let mut out = String::new();
                for name in metrics.handler_names() {
                    if let Some(s) = metrics.snapshot(&name) {
                        out.push_str(&format!(
                            "{name} requests={} errors={} avg_latency={:?} bytes={}\n",
                            s.requests, s.errors, s.average_latency(), s.response_bytes,
                        ));
                    }
                }
                w.write(out.as_bytes()).await?;
                Ok(())
            })
        }));

    let chain = Chain::new(app)
        .with(Monitor::new("app", counters))
        .with(Log::new())
        .with(Gzip::new())
        .with(Trace::new(LogCollector));

    Server::bind("0.0.0.0:3000")
        .serve(chain)
        .await
        .expect("server error");
}
