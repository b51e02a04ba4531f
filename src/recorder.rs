//! Observing writer decorator.
//!
//! [`Recorder`] forwards everything to the writer it wraps and remembers the
//! status it saw committed and the number of body bytes that went through.
//! The tracing and monitoring behaviors both build on it.

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};

use crate::error::Error;
use crate::response::ResponseWriter;

pub struct Recorder<'a> {
    inner: &'a mut dyn ResponseWriter,
    status: Option<StatusCode>,
    bytes: u64,
}

impl<'a> Recorder<'a> {
    pub fn new(inner: &'a mut dyn ResponseWriter) -> Self {
        Self { inner, status: None, bytes: 0 }
    }

    /// The committed status, `200 OK` if the handler never set one.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// Body bytes accepted by the wrapped writer.
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    pub fn into_inner(self) -> &'a mut dyn ResponseWriter {
        self.inner
    }
}

#[async_trait]
impl ResponseWriter for Recorder<'_> {
    fn headers(&self) -> &HeaderMap { self.inner.headers() }
    fn headers_mut(&mut self) -> &mut HeaderMap { self.inner.headers_mut() }
    fn trailers(&self) -> &HeaderMap { self.inner.trailers() }
    fn trailers_mut(&mut self) -> &mut HeaderMap { self.inner.trailers_mut() }

    fn write_header(&mut self, status: StatusCode) -> Result<(), Error> {
        if self.status.is_none() {
            self.status = Some(status);
        }
        self.inner.write_header(status)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        let n = self.inner.write(buf).await?;
        self.bytes += n as u64;
        Ok(n)
    }

    async fn flush(&mut self) -> Result<(), Error> {
        self.inner.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::BufferedWriter;

    #[tokio::test]
    async fn first_status_wins_and_bytes_add_up() {
        let mut out = BufferedWriter::new();
        let mut rec = Recorder::new(&mut out);
        rec.write_header(StatusCode::CREATED).unwrap();
        rec.write_header(StatusCode::IM_A_TEAPOT).unwrap();
        rec.write(b"abc").await.unwrap();
        rec.write(b"de").await.unwrap();

        assert_eq!(rec.status(), StatusCode::CREATED);
        assert_eq!(rec.bytes_written(), 5);
        assert_eq!(out.status(), StatusCode::CREATED);
        assert_eq!(out.body(), b"abcde");
    }

    #[tokio::test]
    async fn status_defaults_to_ok() {
        let mut out = BufferedWriter::new();
        let rec = Recorder::new(&mut out);
        assert_eq!(rec.status(), StatusCode::OK);
    }
}
