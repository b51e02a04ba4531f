//! Span identifiers and their header encoding.
//!
//! Wire form is `trace/span` or `trace/span/parent`, each part 16 lowercase
//! hex digits: `0123456789abcdef/00000000000000ff`.

use std::fmt;
use std::str::FromStr;

use http::HeaderMap;

/// Header carrying the span of the request (inbound) or of the server's
/// handling of it (outbound echo).
pub const SPAN_ID_HEADER: &str = "span-id";

/// Header carrying the caller's span; the server starts a child of it.
pub const PARENT_SPAN_ID_HEADER: &str = "parent-span-id";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpanId {
    pub trace: u64,
    pub span: u64,
    /// Zero for a root span.
    pub parent: u64,
}

impl SpanId {
    /// A new trace with a single root span.
    pub fn new_root() -> Self {
        Self { trace: rand::random(), span: rand::random(), parent: 0 }
    }

    /// A new span in the same trace, parented on `self`.
    pub fn child(&self) -> Self {
        Self { trace: self.trace, span: rand::random(), parent: self.span }
    }

    pub fn is_root(&self) -> bool {
        self.parent == 0
    }

    /// Reads the span for an inbound request.
    ///
    /// `span-id` is taken as is. Otherwise a well-formed `parent-span-id`
    /// yields a child span. Returns `None` when neither header is present and
    /// well-formed; the caller then starts a new root.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let parse = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<SpanId>().ok())
        };
        parse(SPAN_ID_HEADER).or_else(|| parse(PARENT_SPAN_ID_HEADER).map(|p| p.child()))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}/{:016x}", self.trace, self.span)?;
        if self.parent != 0 {
            write!(f, "/{:016x}", self.parent)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("malformed span id")]
pub struct ParseSpanIdError;

impl FromStr for SpanId {
    type Err = ParseSpanIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = |part: &str| {
            if part.is_empty() || part.len() > 16 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ParseSpanIdError);
            }
            u64::from_str_radix(part, 16).map_err(|_| ParseSpanIdError)
        };
        let parts: Vec<&str> = s.trim().split('/').collect();
        match *parts.as_slice() {
            [trace, span] => Ok(Self { trace: hex(trace)?, span: hex(span)?, parent: 0 }),
            [trace, span, parent] => Ok(Self {
                trace: hex(trace)?,
                span: hex(span)?,
                parent: hex(parent)?,
            }),
            _ => Err(ParseSpanIdError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn display_pads_and_omits_zero_parent() {
        let id = SpanId { trace: 1, span: 0xff, parent: 0 };
        assert_eq!(id.to_string(), "0000000000000001/00000000000000ff");
        let child = SpanId { parent: 2, ..id };
        assert_eq!(child.to_string(), "0000000000000001/00000000000000ff/0000000000000002");
    }

    #[test]
    fn parse_accepts_own_output() {
        let id = SpanId { trace: 0xdead, span: 0xbeef, parent: 7 };
        assert_eq!(id.to_string().parse::<SpanId>(), Ok(id));
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in ["", "abc", "1/2/3/4", "xyz/1", "1//2", "+1/2", "00000000000000001/2"] {
            assert_eq!(bad.parse::<SpanId>(), Err(ParseSpanIdError), "{bad:?}");
        }
    }

    #[test]
    fn parent_header_starts_a_child() {
        let mut headers = HeaderMap::new();
        headers.insert(PARENT_SPAN_ID_HEADER, HeaderValue::from_static("000000000000000a/000000000000000b"));
        let id = SpanId::from_headers(&headers).unwrap();
        assert_eq!(id.trace, 0xa);
        assert_eq!(id.parent, 0xb);
    }

    #[test]
    fn span_header_wins_over_parent() {
        let mut headers = HeaderMap::new();
        headers.insert(SPAN_ID_HEADER, HeaderValue::from_static("0000000000000001/0000000000000002"));
        headers.insert(PARENT_SPAN_ID_HEADER, HeaderValue::from_static("000000000000000a/000000000000000b"));
        assert_eq!(
            SpanId::from_headers(&headers),
            Some(SpanId { trace: 1, span: 2, parent: 0 })
        );
    }

    #[test]
    fn child_keeps_trace() {
        let root = SpanId::new_root();
        assert!(root.is_root());
        let child = root.child();
        assert_eq!(child.trace, root.trace);
        assert_eq!(child.parent, root.span);
    }
}
