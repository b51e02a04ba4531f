//! Header summaries with sensitive values removed.

use std::collections::BTreeMap;

use http::HeaderMap;

/// Placeholder recorded instead of a redacted header's value.
pub const REDACTED: &str = "REDACTED";

/// Header names whose values never reach a collector. Matching is
/// case-insensitive.
#[derive(Clone, Debug)]
pub struct Redaction {
    names: Vec<String>,
}

impl Redaction {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { names: names.into_iter().map(Into::into).collect() }
    }

    /// Redacts nothing.
    pub fn none() -> Self {
        Self { names: Vec::new() }
    }

    pub fn is_redacted(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    /// Flattens `headers` then `trailers` into one map keyed by canonical name
    /// (`Content-Type`). Repeated values, and trailer values for a name also
    /// present as a header, are joined with `,` in arrival order.
    pub fn summarize(&self, headers: &HeaderMap, trailers: &HeaderMap) -> BTreeMap<String, String> {
        let mut values: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in headers.iter().chain(trailers.iter()) {
            let entry = values.entry(canonical_header_key(name.as_str())).or_default();
            if self.is_redacted(name.as_str()) {
                if entry.is_empty() {
                    entry.push(REDACTED.to_owned());
                }
            } else {
                entry.push(String::from_utf8_lossy(value.as_bytes()).into_owned());
            }
        }
        values.into_iter().map(|(k, v)| (k, v.join(","))).collect()
    }
}

impl Default for Redaction {
    /// `authorization`, `proxy-authorization`, `cookie`, `set-cookie`.
    fn default() -> Self {
        Self::new(["authorization", "proxy-authorization", "cookie", "set-cookie"])
    }
}

/// `content-type` → `Content-Type`, `x-request-id` → `X-Request-Id`.
pub fn canonical_header_key(name: &str) -> String {
    let mut upper = true;
    name.chars()
        .map(|c| {
            let out = if upper { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() };
            upper = c == '-';
            out
        })
        .collect()
}
