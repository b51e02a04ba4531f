//! Incoming HTTP request type.
//!
//! Requests are owned and mutable: a behavior may rewrite headers or stash
//! values in the [`Context`] before passing the request inward.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, Uri, Version};

use crate::context::Context;

/// An incoming HTTP request with its body fully read.
#[derive(Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) remote_addr: Option<SocketAddr>,
    pub(crate) context: Context,
}

impl Request {
    /// A bodiless HTTP/1.1 request. Handy when hosting a chain outside
    /// [`Server`](crate::Server), and in tests:
    ///
    /// ```rust
    /// use mantle::Request;
    /// use http::Method;
    ///
    /// let req = Request::new(Method::GET, "/users/42".parse().unwrap())
    ///     .with_header("accept-encoding", "gzip");
    /// assert_eq!(req.header("Accept-Encoding"), Some("gzip"));
    /// ```
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            params: HashMap::new(),
            remote_addr: None,
            context: Context::new(),
        }
    }

    pub(crate) fn from_parts(
        parts: http::request::Parts,
        body: Bytes,
        remote_addr: SocketAddr,
    ) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            params: HashMap::new(),
            remote_addr: Some(remote_addr),
            context: Context::new(),
        }
    }

    /// Appends a header.
    ///
    /// # Panics
    ///
    /// Panics if `name` or `value` are not valid header tokens.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = HeaderName::try_from(name).expect("invalid header name");
        let value = HeaderValue::try_from(value).expect("invalid header value");
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn version(&self) -> Version { self.version }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }
    pub fn context(&self) -> &Context { &self.context }
    pub fn context_mut(&mut self) -> &mut Context { &mut self.context }

    /// The request target as sent on the request line: path plus query.
    pub fn request_uri(&self) -> &str {
        self.uri
            .path_and_query()
            .map_or_else(|| self.uri.path(), |pq| pq.as_str())
    }

    /// Case-insensitive header lookup. Returns the first value if the header
    /// repeats, `None` if it is absent or not visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}
