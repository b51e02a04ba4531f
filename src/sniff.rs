//! Content-type detection from the leading bytes of a body.
//!
//! A practical subset of the WHATWG MIME sniffing algorithm: markup
//! signatures, a table of magic numbers, then a binary-or-text decision. Used
//! by writers that must set `content-type` before the first byte leaves,
//! notably the gzip decorator (a compressed body cannot be sniffed by the
//! client).

/// Bytes considered by [`detect_content_type`].
pub const SNIFF_LEN: usize = 512;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

/// HTML tags recognised after optional leading whitespace. Matched
/// case-insensitively and only when followed by a space or `>`.
const HTML_TAGS: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

/// Exact prefixes, checked in order against the raw bytes.
const MAGIC: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"%!PS-Adobe-", "application/postscript"),
    (b"\xFE\xFF", "text/plain; charset=utf-16be"),
    (b"\xFF\xFE", "text/plain; charset=utf-16le"),
    (b"\xEF\xBB\xBF", TEXT_PLAIN),
    (b"\x00\x00\x01\x00", "image/x-icon"),
    (b"\x00\x00\x02\x00", "image/x-icon"),
    (b"BM", "image/bmp"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"\x89PNG\x0D\x0A\x1A\x0A", "image/png"),
    (b"\xFF\xD8\xFF", "image/jpeg"),
    (b"OggS\x00", "application/ogg"),
    (b"MThd\x00\x00\x00\x06", "audio/midi"),
    (b"ID3", "audio/mpeg"),
    (b"\x1F\x8B\x08", "application/x-gzip"),
    (b"PK\x03\x04", "application/zip"),
    (b"Rar!\x1A\x07\x00", "application/x-rar-compressed"),
    (b"Rar!\x1A\x07\x01\x00", "application/x-rar-compressed"),
    (b"\x00\x61\x73\x6D", "application/wasm"),
];

/// Returns the MIME type sniffed from `data`. Never fails: unknown binary is
/// `application/octet-stream`, unknown text is `text/plain; charset=utf-8`.
pub fn detect_content_type(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];

    let markup = trim_leading_ws(data);
    if HTML_TAGS.iter().any(|tag| is_html_tag(markup, tag)) {
        return "text/html; charset=utf-8";
    }
    if markup.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }

    if let Some(&(_, mime)) = MAGIC.iter().find(|(sig, _)| data.starts_with(sig)) {
        return mime;
    }
    if let Some(mime) = riff(data) {
        return mime;
    }

    if data.iter().copied().any(is_binary) {
        OCTET_STREAM
    } else {
        TEXT_PLAIN
    }
}

fn trim_leading_ws(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | b' '))
        .unwrap_or(data.len());
    &data[start..]
}

fn is_html_tag(data: &[u8], tag: &[u8]) -> bool {
    if data.len() <= tag.len() || !data[..tag.len()].eq_ignore_ascii_case(tag) {
        return false;
    }
    matches!(data[tag.len()], b' ' | b'>')
}

/// RIFF containers carry their format four bytes after the size field.
fn riff(data: &[u8]) -> Option<&'static str> {
    if data.len() < 12 || &data[..4] != b"RIFF" {
        return None;
    }
    match &data[8..12] {
        b"WEBP" => Some("image/webp"),
        b"WAVE" => Some("audio/wave"),
        b"AVI " => Some("video/avi"),
        _ => None,
    }
}

fn is_binary(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}
