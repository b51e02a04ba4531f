//! The response side of the handler boundary.
//!
//! Handlers do not return a response value. They write one, through a
//! borrowed [`ResponseWriter`], so behaviors can put a decorated writer in
//! front of the real one: a compressor transforming the bytes, a recorder
//! measuring them. Decorators hold the writer they wrap and forward every call
//! they do not intercept, so decorations compose in any depth.
//!
//! Two writers ship with the crate:
//!
//! - [`StreamWriter`]: used by [`Server`](crate::Server). Head on commit,
//!   body frames over a bounded channel into hyper, trailers on finish.
//! - [`BufferedWriter`]: collects the whole response in memory. For hosting
//!   a chain outside the server, and for tests.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use hyper::body::{Body, Frame};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::error::Error;

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// A response sink.
///
/// Lifecycle: headers are mutable until the head is committed, either by an
/// explicit [`write_header`](ResponseWriter::write_header) or implicitly by
/// the first [`write`](ResponseWriter::write) (status `200 OK`). Header edits
/// after commit are not sent. Trailers may be edited until the response
/// completes.
#[async_trait]
pub trait ResponseWriter: Send {
    fn headers(&self) -> &HeaderMap;
    fn headers_mut(&mut self) -> &mut HeaderMap;
    fn trailers(&self) -> &HeaderMap;
    fn trailers_mut(&mut self) -> &mut HeaderMap;

    /// Commits the status line and headers. Only the first call has effect.
    fn write_header(&mut self, status: StatusCode) -> Result<(), Error>;

    /// Writes all of `buf` or fails. Returns `buf.len()` on success.
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Error>;

    /// Pushes any buffered output towards the client.
    async fn flush(&mut self) -> Result<(), Error>;
}

#[async_trait]
impl<W: ResponseWriter + ?Sized> ResponseWriter for &mut W {
    fn headers(&self) -> &HeaderMap { (**self).headers() }
    fn headers_mut(&mut self) -> &mut HeaderMap { (**self).headers_mut() }
    fn trailers(&self) -> &HeaderMap { (**self).trailers() }
    fn trailers_mut(&mut self) -> &mut HeaderMap { (**self).trailers_mut() }

    fn write_header(&mut self, status: StatusCode) -> Result<(), Error> {
        (**self).write_header(status)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        (**self).write(buf).await
    }

    async fn flush(&mut self) -> Result<(), Error> {
        (**self).flush().await
    }
}

// ── StreamWriter ──────────────────────────────────────────────────────────────

/// Status line and headers handed to the server at commit time.
#[derive(Debug)]
pub(crate) struct Head {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
}

impl Head {
    pub(crate) fn into_response<B>(self, body: B) -> http::Response<B> {
        let mut res = http::Response::new(body);
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

type FrameResult = Result<Frame<Bytes>, Error>;

/// Frames buffered between the handler task and hyper before `write` waits.
const CHANNEL_CAPACITY: usize = 16;

/// Writer backed by a live hyper connection.
///
/// Created by the server together with a [`ResponseBody`]. Every `write`
/// becomes one data frame; back-pressure comes from the bounded channel, so a
/// slow client slows the handler rather than growing memory.
pub struct StreamWriter {
    status: StatusCode,
    headers: HeaderMap,
    trailers: HeaderMap,
    head: Option<oneshot::Sender<Head>>,
    body: Option<mpsc::Sender<FrameResult>>,
}

pub(crate) fn channel() -> (StreamWriter, oneshot::Receiver<Head>, ResponseBody) {
    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let writer = StreamWriter {
        status: StatusCode::OK,
        headers: HeaderMap::new(),
        trailers: HeaderMap::new(),
        head: Some(head_tx),
        body: Some(body_tx),
    };
    (writer, head_rx, ResponseBody { rx: Some(body_rx) })
}

impl StreamWriter {
    pub fn is_committed(&self) -> bool {
        self.head.is_none()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn commit(&mut self) -> Result<(), Error> {
        if let Some(tx) = self.head.take() {
            let head = Head { status: self.status, headers: self.headers.clone() };
            tx.send(head).map_err(|_| Error::Closed)?;
        }
        Ok(())
    }

    async fn send(&mut self, frame: Frame<Bytes>) -> Result<(), Error> {
        let tx = self.body.as_ref().ok_or(Error::Finished)?;
        tx.send(Ok(frame)).await.map_err(|_| Error::Closed)
    }

    /// Completes the response: commits the head if nothing was written, sends
    /// trailers, and ends the body stream.
    pub async fn finish(&mut self) -> Result<(), Error> {
        self.commit()?;
        if !self.trailers.is_empty() {
            let trailers = std::mem::take(&mut self.trailers);
            self.send(Frame::trailers(trailers)).await?;
        }
        self.body = None;
        Ok(())
    }

    /// Ends the response after a failed handler.
    ///
    /// Before commit the client gets a bare `500`. After commit the body
    /// stream is failed so the connection is reset instead of presenting a
    /// truncated body as complete.
    pub async fn abort(&mut self, err: Error) {
        if self.is_committed() {
            if let Some(tx) = self.body.take() {
                let _ = tx.send(Err(err)).await;
            }
        } else {
            self.headers.clear();
            self.status = StatusCode::INTERNAL_SERVER_ERROR;
            let _ = self.commit();
            self.body = None;
        }
    }
}

#[async_trait]
impl ResponseWriter for StreamWriter {
    fn headers(&self) -> &HeaderMap { &self.headers }
    fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    fn trailers(&self) -> &HeaderMap { &self.trailers }
    fn trailers_mut(&mut self) -> &mut HeaderMap { &mut self.trailers }

    fn write_header(&mut self, status: StatusCode) -> Result<(), Error> {
        if self.is_committed() {
            warn!(%status, "superfluous write_header call");
            return Ok(());
        }
        self.status = status;
        self.commit()
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if self.body.is_none() {
            return Err(Error::Finished);
        }
        self.commit()?;
        if buf.is_empty() {
            return Ok(0);
        }
        self.send(Frame::data(Bytes::copy_from_slice(buf))).await?;
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Error> {
        // Frames are handed to hyper as they are written.
        if self.body.as_ref().is_some_and(mpsc::Sender::is_closed) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl Drop for StreamWriter {
    /// A writer dropped mid-stream (panicking handler, cancelled task) fails
    /// the body rather than letting it end cleanly.
    fn drop(&mut self) {
        if let Some(tx) = self.body.take() {
            if self.head.is_none() {
                let _ = tx.try_send(Err(Error::Closed));
            }
        }
    }
}

/// Streaming body paired with a [`StreamWriter`].
pub struct ResponseBody {
    rx: Option<mpsc::Receiver<FrameResult>>,
}

impl ResponseBody {
    pub(crate) fn empty() -> Self {
        Self { rx: None }
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.rx.as_mut() {
            Some(rx) => rx.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.rx.is_none()
    }
}

// ── BufferedWriter ────────────────────────────────────────────────────────────

/// Writer that keeps the whole response in memory.
///
/// Reports what a client would have received: the committed status, the
/// headers as they stood at commit time, the body bytes, and the trailers.
#[derive(Debug, Default)]
pub struct BufferedWriter {
    status: Option<StatusCode>,
    headers: HeaderMap,
    /// Snapshot of `headers` at commit time: what a client would have seen.
    committed: Option<HeaderMap>,
    trailers: HeaderMap,
    body: BytesMut,
}

impl BufferedWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed status, `200 OK` if nothing was committed.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn is_committed(&self) -> bool {
        self.committed.is_some()
    }

    /// Headers as a client would receive them: the commit-time snapshot, or
    /// the live map if the head was never committed.
    pub fn sent_headers(&self) -> &HeaderMap {
        self.committed.as_ref().unwrap_or(&self.headers)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body.freeze()
    }

    fn commit(&mut self, status: StatusCode) {
        if self.committed.is_none() {
            self.status = Some(status);
            self.committed = Some(self.headers.clone());
        }
    }
}

#[async_trait]
impl ResponseWriter for BufferedWriter {
    fn headers(&self) -> &HeaderMap { &self.headers }
    fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    fn trailers(&self) -> &HeaderMap { &self.trailers }
    fn trailers_mut(&mut self) -> &mut HeaderMap { &mut self.trailers }

    fn write_header(&mut self, status: StatusCode) -> Result<(), Error> {
        if self.is_committed() {
            warn!(%status, "superfluous write_header call");
        }
        self.commit(status);
        Ok(())
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        self.commit(StatusCode::OK);
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
