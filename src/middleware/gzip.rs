//! Negotiated gzip compression of response bodies.
//!
//! Active only when the request's `accept-encoding` lists `gzip` (or
//! `x-gzip`) with a non-zero quality. The header is removed before the
//! request moves inward, so no behavior further in compresses a second time.
//!
//! When active, the writer handed inward is a [`GzipWriter`]:
//!
//! ```text
//!            first write           close()
//!   Idle ───────────────▶ Streaming ───────▶ Closed
//!     │                                        ▲
//!     └── content-encoding already set ──▶ Passthrough
//!         or status without body
//! ```
//!
//! - the head is held back until the first non-empty body chunk (or flush,
//!   or close), so content type can be sniffed from that chunk if the
//!   handler left it unset; the client cannot sniff a compressed body
//! - `content-length` is dropped at commit; it describes the uncompressed
//!   bytes and the transport falls back to chunked framing
//! - the encoder is finished on every return path, and its failure is an
//!   error of this behavior

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, VARY};
use http::{HeaderMap, HeaderValue, StatusCode};
use tracing::{debug, warn};

use crate::error::Error;
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::middleware::Behavior;
use crate::request::Request;
use crate::response::ResponseWriter;
use crate::sniff::detect_content_type;

/// Gzip compression behavior. Defaults to `flate2`'s default level.
#[derive(Clone, Copy, Debug)]
pub struct Gzip {
    level: Compression,
}

impl Gzip {
    pub fn new() -> Self {
        Self { level: Compression::default() }
    }

    pub fn level(mut self, level: Compression) -> Self {
        self.level = level;
        self
    }
}

impl Default for Gzip {
    fn default() -> Self { Self::new() }
}

impl Behavior for Gzip {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(GzipHandler { level: self.level, next })
    }
}

struct GzipHandler {
    level: Compression,
    next: BoxedHandler,
}

impl Handler for GzipHandler {
    fn call<'a>(&'a self, mut req: Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        Box::pin(async move {
            if !accepts_gzip(req.headers()) {
                debug!(path = req.path(), "gzip not accepted, passing through");
                return self.next.call(req, w).await;
            }
            req.headers_mut().remove(ACCEPT_ENCODING);

            let mut gz = GzipWriter::new(w, self.level);
            let result = self.next.call(req, &mut gz).await;
            let closed = gz.close().await;

            match (result, closed) {
                (Ok(()), closed) => closed,
                (Err(e), Ok(())) => Err(e),
                (Err(e), Err(close)) => {
                    warn!(error = %close, "gzip close failed after handler error");
                    Err(e)
                }
            }
        })
    }
}

/// Whether `accept-encoding` admits gzip. Codings are matched
/// case-insensitively; `q=0` (or an unparsable quality) refuses.
pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|entry| {
            let mut parts = entry.split(';').map(str::trim);
            let coding = parts.next().unwrap_or_default();
            if !coding.eq_ignore_ascii_case("gzip") && !coding.eq_ignore_ascii_case("x-gzip") {
                return false;
            }
            parts
                .filter_map(|p| p.split_once('='))
                .find(|(k, _)| k.trim().eq_ignore_ascii_case("q"))
                .map_or(true, |(_, q)| q.trim().parse::<f32>().is_ok_and(|q| q > 0.0))
        })
}

fn carries_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

// ── GzipWriter ────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Streaming,
    Passthrough,
    Closed,
}

/// Writer decorator that gzips the body on its way to `inner`.
pub struct GzipWriter<'a> {
    inner: &'a mut dyn ResponseWriter,
    level: Compression,
    encoder: Option<GzEncoder<Vec<u8>>>,
    state: State,
    /// Status of a streaming head not yet forwarded to `inner`.
    pending: Option<StatusCode>,
}

impl<'a> GzipWriter<'a> {
    pub fn new(inner: &'a mut dyn ResponseWriter, level: Compression) -> Self {
        Self { inner, level, encoder: None, state: State::Idle, pending: None }
    }

    /// Finishes the gzip stream and forwards its tail. A writer that never
    /// committed anything leaves the response untouched.
    pub async fn close(&mut self) -> Result<(), Error> {
        let state = std::mem::replace(&mut self.state, State::Closed);
        if state != State::Streaming {
            return Ok(());
        }
        let Some(encoder) = self.encoder.take() else {
            return Ok(());
        };
        let tail = encoder.finish()?;
        self.commit_head(&[])?;
        if !tail.is_empty() {
            self.inner.write(&tail).await?;
        }
        Ok(())
    }

    fn begin(&mut self, status: StatusCode) {
        let headers = self.inner.headers_mut();
        if headers.contains_key(CONTENT_ENCODING) || !carries_body(status) {
            self.state = State::Passthrough;
            return;
        }
        headers.remove(CONTENT_LENGTH);
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        let varies = headers
            .get_all(VARY)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("accept-encoding")));
        if !varies {
            headers.append(VARY, HeaderValue::from_static("accept-encoding"));
        }
        self.encoder = Some(GzEncoder::new(Vec::new(), self.level));
        self.state = State::Streaming;
    }

    /// Forwards a held head, sniffing the content type from `first_chunk`
    /// when it is non-empty and none was set.
    fn commit_head(&mut self, first_chunk: &[u8]) -> Result<(), Error> {
        let Some(status) = self.pending.take() else {
            return Ok(());
        };
        let headers = self.inner.headers_mut();
        if !first_chunk.is_empty() && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(detect_content_type(first_chunk)));
        }
        self.inner.write_header(status)
    }

    /// Moves whatever the encoder produced so far to `inner`.
    async fn drain(&mut self) -> Result<(), Error> {
        let out = match self.encoder.as_mut() {
            Some(encoder) => std::mem::take(encoder.get_mut()),
            None => return Ok(()),
        };
        if !out.is_empty() {
            self.inner.write(&out).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ResponseWriter for GzipWriter<'_> {
    fn headers(&self) -> &HeaderMap { self.inner.headers() }
    fn headers_mut(&mut self) -> &mut HeaderMap { self.inner.headers_mut() }
    fn trailers(&self) -> &HeaderMap { self.inner.trailers() }
    fn trailers_mut(&mut self) -> &mut HeaderMap { self.inner.trailers_mut() }

    fn write_header(&mut self, status: StatusCode) -> Result<(), Error> {
        match self.state {
            State::Idle => {
                self.begin(status);
                if self.state == State::Streaming {
                    self.pending = Some(status);
                    return Ok(());
                }
                self.inner.write_header(status)
            }
            State::Streaming if self.pending.is_some() => {
                warn!(%status, "superfluous write_header call");
                Ok(())
            }
            _ => self.inner.write_header(status),
        }
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if self.state == State::Idle {
            // Nothing to sniff yet.
            if buf.is_empty() {
                return Ok(0);
            }
            self.write_header(StatusCode::OK)?;
        }
        match self.state {
            State::Passthrough => self.inner.write(buf).await,
            State::Streaming => {
                if buf.is_empty() {
                    return Ok(0);
                }
                self.commit_head(buf)?;
                if let Some(encoder) = self.encoder.as_mut() {
                    encoder.write_all(buf)?;
                }
                self.drain().await?;
                Ok(buf.len())
            }
            State::Idle | State::Closed => Err(Error::Finished),
        }
    }

    async fn flush(&mut self) -> Result<(), Error> {
        if self.state == State::Streaming {
            self.commit_head(&[])?;
            if let Some(encoder) = self.encoder.as_mut() {
                encoder.flush()?;
            }
            self.drain().await?;
        }
        self.inner.flush().await
    }
}
