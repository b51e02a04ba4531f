use std::io::Read;
use std::sync::{Arc, Mutex};

use flate2::read::GzDecoder;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, VARY};
use http::{HeaderValue, Method, StatusCode, Uri};
use mantle::middleware::Gzip;
use mantle::{handler_fn, BufferedWriter, Chain, Error, Handler, Request, ResponseWriter};

fn get(accept_encoding: Option<&str>) -> Request {
    let req = Request::new(Method::GET, Uri::from_static("/"));
    match accept_encoding {
        Some(v) => req.with_header("accept-encoding", v),
        None => req,
    }
}

fn gunzip(body: &[u8]) -> String {
    let mut out = String::new();
    GzDecoder::new(body).read_to_string(&mut out).unwrap();
    out
}

/// Writes `body` in one call after presetting a stale content-length.
fn writes(body: &'static str) -> impl Handler {
    handler_fn(move |_req, w| Box::pin(async move {
        w.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        w.write(body.as_bytes()).await?;
        Ok(())
    }))
}

#[tokio::test]
async fn compresses_when_accepted() {
    let chain = Chain::new(writes("hello")).with(Gzip::new());
    let mut w = BufferedWriter::new();
    chain.dispatch(get(Some("gzip, deflate")), &mut w).await.unwrap();

    let headers = w.sent_headers();
    assert_eq!(headers[CONTENT_ENCODING], "gzip");
    assert!(headers.get(CONTENT_LENGTH).is_none());
    assert_eq!(headers[CONTENT_TYPE], "text/plain; charset=utf-8");
    assert_eq!(headers[VARY], "accept-encoding");
    assert_ne!(w.body(), b"hello");
    assert_eq!(gunzip(w.body()), "hello");
}

#[tokio::test]
async fn passes_through_when_not_accepted() {
    let chain = Chain::new(writes("hello")).with(Gzip::new());
    for accept in [None, Some("br"), Some("gzip;q=0")] {
        let mut w = BufferedWriter::new();
        chain.dispatch(get(accept), &mut w).await.unwrap();

        let headers = w.sent_headers();
        assert!(headers.get(CONTENT_ENCODING).is_none(), "{accept:?}");
        assert_eq!(headers[CONTENT_LENGTH], "5");
        assert_eq!(w.body(), b"hello");
    }
}

#[tokio::test]
async fn strips_accept_encoding_before_forwarding() {
    let seen = Arc::new(Mutex::new(None::<bool>));
    let inspect = {
        let seen = Arc::clone(&seen);
        handler_fn(move |req, _w| {
            let seen = Arc::clone(&seen);
            Box::pin(async move {
                *seen.lock().unwrap() = Some(req.headers().contains_key(ACCEPT_ENCODING));
                Ok(())
            })
        })
    };
    let chain = Chain::new(inspect).with(Gzip::new());
    chain.dispatch(get(Some("gzip")), &mut BufferedWriter::new()).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), Some(false));
}

#[tokio::test]
async fn stacked_gzip_compresses_once() {
    let chain = Chain::new(writes("hello")).with(Gzip::new()).with(Gzip::new());
    let mut w = BufferedWriter::new();
    chain.dispatch(get(Some("gzip")), &mut w).await.unwrap();

    assert_eq!(gunzip(w.body()), "hello");
}

#[tokio::test]
async fn explicit_content_type_is_kept() {
    let app = handler_fn(|_req, w| Box::pin(async move {
        w.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        w.write(b"hello").await?;
        Ok(())
    }));
    let chain = Chain::new(app).with(Gzip::new());
    let mut w = BufferedWriter::new();
    chain.dispatch(get(Some("gzip")), &mut w).await.unwrap();

    assert_eq!(w.sent_headers()[CONTENT_TYPE], "application/json");
}

#[tokio::test]
async fn content_type_is_sniffed_from_the_first_chunk_only() {
    let app = handler_fn(|_req, w| Box::pin(async move {
        w.write(b"<html><body>").await?;
        w.write(b"\x00\x01 binary tail").await?;
        Ok(())
    }));
    let chain = Chain::new(app).with(Gzip::new());
    let mut w = BufferedWriter::new();
    chain.dispatch(get(Some("gzip")), &mut w).await.unwrap();

    assert_eq!(w.sent_headers()[CONTENT_TYPE], "text/html; charset=utf-8");
    assert_eq!(gunzip(w.body()), "<html><body>\u{0}\u{1} binary tail");
}

#[tokio::test]
async fn content_type_is_sniffed_after_an_explicit_write_header() {
    let app = handler_fn(|_req, w| Box::pin(async move {
        w.write_header(StatusCode::OK)?;
        w.write(b"<html><body>hi").await?;
        Ok(())
    }));
    let chain = Chain::new(app).with(Gzip::new());
    let mut w = BufferedWriter::new();
    chain.dispatch(get(Some("gzip")), &mut w).await.unwrap();

    let headers = w.sent_headers();
    assert_eq!(headers[CONTENT_ENCODING], "gzip");
    assert_eq!(headers[CONTENT_TYPE], "text/html; charset=utf-8");
    assert_eq!(gunzip(w.body()), "<html><body>hi");
}

#[tokio::test]
async fn empty_first_write_does_not_decide_the_content_type() {
    let app = handler_fn(|_req, w| Box::pin(async move {
        assert_eq!(w.write(b"").await?, 0);
        w.write(b"<html><body>hi").await?;
        Ok(())
    }));
    let chain = Chain::new(app).with(Gzip::new());
    let mut w = BufferedWriter::new();
    chain.dispatch(get(Some("gzip")), &mut w).await.unwrap();

    assert_eq!(w.sent_headers()[CONTENT_TYPE], "text/html; charset=utf-8");
    assert_eq!(gunzip(w.body()), "<html><body>hi");
}

#[tokio::test]
async fn explicit_write_header_clears_length() {
    let app = handler_fn(|_req, w| Box::pin(async move {
        w.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from_static("11"));
        w.write_header(StatusCode::CREATED)?;
        w.write(b"hello world").await?;
        Ok(())
    }));
    let chain = Chain::new(app).with(Gzip::new());
    let mut w = BufferedWriter::new();
    chain.dispatch(get(Some("gzip")), &mut w).await.unwrap();

    assert_eq!(w.status(), StatusCode::CREATED);
    assert!(w.sent_headers().get(CONTENT_LENGTH).is_none());
    assert_eq!(gunzip(w.body()), "hello world");
}

#[tokio::test]
async fn many_writes_and_flushes_form_one_stream() {
    let app = handler_fn(|_req, w| Box::pin(async move {
        for i in 0..100 {
            w.write(format!("line {i}\n").as_bytes()).await?;
            if i % 10 == 0 {
                w.flush().await?;
            }
        }
        Ok(())
    }));
    let chain = Chain::new(app).with(Gzip::new());
    let mut w = BufferedWriter::new();
    chain.dispatch(get(Some("gzip")), &mut w).await.unwrap();

    let expected: String = (0..100).map(|i| format!("line {i}\n")).collect();
    assert_eq!(gunzip(w.body()), expected);
}

#[tokio::test]
async fn bodiless_responses_are_left_alone() {
    let no_content = handler_fn(|_req, w| Box::pin(async move {
        w.write_header(StatusCode::NO_CONTENT)
    }));
    let chain = Chain::new(no_content).with(Gzip::new());
    let mut w = BufferedWriter::new();
    chain.dispatch(get(Some("gzip")), &mut w).await.unwrap();

    assert_eq!(w.status(), StatusCode::NO_CONTENT);
    assert!(w.sent_headers().get(CONTENT_ENCODING).is_none());
    assert!(w.body().is_empty());
}

#[tokio::test]
async fn nothing_written_means_nothing_encoded() {
    let silent = handler_fn(|_req, _w| Box::pin(async move { Ok(()) }));
    let chain = Chain::new(silent).with(Gzip::new());
    let mut w = BufferedWriter::new();
    chain.dispatch(get(Some("gzip")), &mut w).await.unwrap();

    assert!(!w.is_committed());
    assert!(w.headers().get(CONTENT_ENCODING).is_none());
    assert!(w.body().is_empty());
}

#[tokio::test]
async fn already_encoded_bodies_pass_through() {
    let app = handler_fn(|_req, w| Box::pin(async move {
        w.headers_mut().insert(CONTENT_ENCODING, HeaderValue::from_static("br"));
        w.write(b"\x0b\x02\x80hello\x03").await?;
        Ok(())
    }));
    let chain = Chain::new(app).with(Gzip::new());
    let mut w = BufferedWriter::new();
    chain.dispatch(get(Some("gzip, br")), &mut w).await.unwrap();

    assert_eq!(w.sent_headers()[CONTENT_ENCODING], "br");
    assert_eq!(w.body(), b"\x0b\x02\x80hello\x03");
}

#[tokio::test]
async fn stream_is_closed_when_the_handler_fails() {
    let app = handler_fn(|_req, w| Box::pin(async move {
        w.write(b"partial").await?;
        Err(Error::handler("upstream went away"))
    }));
    let chain = Chain::new(app).with(Gzip::new());
    let mut w = BufferedWriter::new();
    let err = chain.dispatch(get(Some("gzip")), &mut w).await.unwrap_err();

    assert!(matches!(err, Error::Handler(_)));
    // The gzip trailer was still written: the body is a complete stream.
    assert_eq!(gunzip(w.body()), "partial");
}

/// A sink that refuses body bytes, like a connection the client closed.
#[derive(Default)]
struct Disconnected {
    inner: BufferedWriter,
}

#[async_trait::async_trait]
impl ResponseWriter for Disconnected {
    fn headers(&self) -> &http::HeaderMap { self.inner.headers() }
    fn headers_mut(&mut self) -> &mut http::HeaderMap { self.inner.headers_mut() }
    fn trailers(&self) -> &http::HeaderMap { self.inner.trailers() }
    fn trailers_mut(&mut self) -> &mut http::HeaderMap { self.inner.trailers_mut() }
    fn write_header(&mut self, status: StatusCode) -> Result<(), Error> {
        self.inner.write_header(status)
    }
    async fn write(&mut self, _buf: &[u8]) -> Result<usize, Error> {
        Err(Error::Closed)
    }
    async fn flush(&mut self) -> Result<(), Error> {
        Err(Error::Closed)
    }
}

#[tokio::test]
async fn aborted_writes_surface_as_errors() {
    let chain = Chain::new(writes("hello")).with(Gzip::new());
    let mut w = Disconnected::default();
    let err = chain.dispatch(get(Some("gzip")), &mut w).await.unwrap_err();

    assert!(matches!(err, Error::Closed));
}

#[tokio::test]
async fn close_failure_propagates_after_a_clean_handler() {
    // The handler writes nothing the encoder emits yet and returns Ok; the
    // failure only shows when the gzip tail is forwarded on close.
    let app = handler_fn(|_req, w| Box::pin(async move {
        w.write_header(StatusCode::OK)
    }));
    let chain = Chain::new(app).with(Gzip::new());
    let mut w = Disconnected::default();
    let err = chain.dispatch(get(Some("gzip")), &mut w).await.unwrap_err();

    assert!(matches!(err, Error::Closed));
}
