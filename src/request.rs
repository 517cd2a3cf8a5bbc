//! Component B: the request-head parser.
//!
//! Reads a request head (method, target, version, headers) up to a size
//! cap, folds header continuations, comma-folds the twenty canonical
//! repeatable headers, and recognizes the two pseudo-requests a raw
//! socket can receive on a plaintext port: a TLS ClientHello, and a
//! Flash cross-domain policy-file probe.
//!
//! This is a hand-written line-oriented parser rather than a wrapper
//! around a generic HTTP tokenizer: none of the off-the-shelf parsers in
//! this ecosystem fold header continuations and comma-separated-repeat
//! headers the way this protocol requires, and pseudo-request sniffing
//! has to happen before a single CRLF has even been seen.

use std::collections::HashSet;

use futures::{Async, Poll};
use tokio_core::io::Io;

use buf_stream::BufStream;
use enums::{Method, Version};
use error::{Error, ParseError};

/// What `read_request_head` found: a real request, one of the two
/// pseudo-requests recognized before any HTTP parsing happens, or a
/// request line/header block that failed to parse -- the caller still
/// has a well-defined blank-line-terminated head it can answer with a
/// fixed `400`, rather than a bare connection drop.
#[derive(Debug)]
pub enum ParsedHead {
    Normal(RequestHead),
    TlsClientHello,
    PolicyFileProbe,
    Invalid(ParseError),
}

/// A fully parsed request line + header list.
#[derive(Debug)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    /// Header list in arrival order; continuations already folded,
    /// comma-foldable names already joined.
    pub headers: Vec<(String, String)>,
}

/// The twenty canonical header names which get comma-folded across
/// repetitions, taken from `wsgi.py`'s `COMMA_SEPARATED_REQHEAD`
/// (itself sourced from CherryPy).
const COMMA_FOLDED: &'static [&'static str] = &[
    "ACCEPT", "ACCEPT-CHARSET", "ACCEPT-ENCODING", "ACCEPT-LANGUAGE",
    "ACCEPT-RANGES", "ALLOW", "CACHE-CONTROL", "CONNECTION",
    "CONTENT-ENCODING", "CONTENT-LANGUAGE", "EXPECT", "IF-MATCH",
    "IF-NONE-MATCH", "PRAGMA", "PROXY-AUTHENTICATE", "TE", "TRAILER",
    "TRANSFER-ENCODING", "VARY", "VIA", "WARNING", "WWW-AUTHENTICATE",
];

fn is_comma_folded(name: &str) -> bool {
    COMMA_FOLDED.iter().any(|&n| n.eq_ignore_ascii_case(name))
}

/// Matches the accepted sub-URL grammar:
/// `/[-A-Za-z0-9_./,~!@$*()\[\]\';:?&%+=]*`
fn is_valid_sub_url(s: &str) -> bool {
    if !s.starts_with('/') {
        return false;
    }
    s.bytes().all(|b| {
        (b as char).is_ascii_alphanumeric() ||
        b"-_./,~!@$*()[]';:?&%+=".contains(&b)
    })
}

/// The Flash cross-domain policy-file probe: a bare ASCII line, not a
/// HTTP request at all.
const POLICY_FILE_PROBE: &'static [u8] = b"<policy-file-request/>";

/// Reads a request head from `stream`, up to `max_bytes` total.
///
/// On success returns the parsed record (consuming exactly the bytes of
/// the head, including the trailing blank line) or a pseudo-request
/// classification. Fails with `ParseError::HeadTooLong` if the blank
/// line boundary is not found within the cap.
pub fn read_request_head<S: Io>(stream: &mut BufStream<S>, max_bytes: usize)
    -> Poll<ParsedHead, Error>
{
    try_ready!(stream.ensure_readable());

    if let Some(first) = stream.peek(1) {
        match first[0] {
            0x16 | 0x80 => return Ok(Async::Ready(ParsedHead::TlsClientHello)),
            _ => {}
        }
    } else {
        return Ok(Async::NotReady);
    }

    if let Some(probe) = stream.peek(POLICY_FILE_PROBE.len()) {
        if probe == POLICY_FILE_PROBE {
            stream.discard(POLICY_FILE_PROBE.len());
            return Ok(Async::Ready(ParsedHead::PolicyFileProbe));
        }
    }

    // Look for the blank-line boundary within the cap before doing any
    // real parsing, so "too long" is detected deterministically.
    loop {
        if let Some(pos) = find_head_boundary(stream.in_buf()) {
            if pos > max_bytes {
                return Err(Error::Parse(ParseError::HeadTooLong));
            }
            break;
        }
        if stream.read_buffer_len() > max_bytes {
            return Err(Error::Parse(ParseError::HeadTooLong));
        }
        match try_ready_fill(stream)? {
            Async::Ready(()) => continue,
            Async::NotReady => return Ok(Async::NotReady),
        }
    }

    let boundary = find_head_boundary(stream.in_buf()).unwrap();
    let raw: Vec<u8> = stream.in_buf()[..boundary].to_vec();
    stream.discard(boundary + 4); // the raw head + the trailing "\r\n\r\n"

    match parse_head_bytes(&raw) {
        Ok(h) => Ok(Async::Ready(ParsedHead::Normal(h))),
        Err(e) => Ok(Async::Ready(ParsedHead::Invalid(e))),
    }
}

/// A thin re-poll helper: grows the buffer by one chunk, propagating
/// `NotReady`/errors, without imposing a target length (the caller
/// checks the boundary itself on each iteration).
fn try_ready_fill<S: Io>(stream: &mut BufStream<S>) -> Poll<(), Error> {
    stream.fill_at_least(stream.read_buffer_len() + 1)
}

/// Finds `"\r\n\r\n"`. Returns the offset of the boundary (i.e. the
/// length of the head excluding the terminator).
fn find_head_boundary(buf: &[u8]) -> Option<usize> {
    if buf.len() < 4 {
        return None;
    }
    for i in 0..=buf.len() - 4 {
        if &buf[i..i + 4] == b"\r\n\r\n" {
            return Some(i);
        }
    }
    None
}

fn parse_head_bytes(raw: &[u8]) -> Result<RequestHead, ParseError> {
    let text = String::from_utf8_lossy(raw);
    let mut lines = unfold_continuations(&text);
    if lines.is_empty() {
        return Err(ParseError::MalformedRequestLine);
    }
    let request_line = lines.remove(0);
    let mut parts = request_line.splitn(3, ' ');
    let method_str = parts.next().ok_or(ParseError::MalformedRequestLine)?;
    let target = parts.next().ok_or(ParseError::MalformedRequestLine)?;
    let version_str = parts.next().ok_or(ParseError::MalformedRequestLine)?;
    if parts.next().is_some() {
        return Err(ParseError::MalformedRequestLine);
    }

    let method = Method::parse(method_str).ok_or(ParseError::BadMethod)?;
    let version = Version::parse(version_str).ok_or(ParseError::BadVersion)?;
    if !is_valid_sub_url(target) {
        return Err(ParseError::BadUri);
    }

    let mut headers: Vec<(String, String)> = Vec::new();
    let mut seen_comma_folded: HashSet<String> = HashSet::new();
    for line in lines {
        let idx = line.find(':').ok_or(ParseError::BadHeaderLine)?;
        let name = line[..idx].trim().to_string();
        let value = line[idx + 1..].trim().to_string();
        if name.is_empty() {
            return Err(ParseError::BadHeaderLine);
        }
        if is_comma_folded(&name) {
            let key = name.to_ascii_uppercase();
            if seen_comma_folded.contains(&key) {
                let existing = headers.iter_mut()
                    .find(|entry| entry.0.to_ascii_uppercase() == key);
                if let Some(entry) = existing {
                    entry.1.push_str(", ");
                    entry.1.push_str(&value);
                    continue;
                }
            }
            seen_comma_folded.insert(key);
        }
        headers.push((name, value));
    }

    Ok(RequestHead {
        method: method,
        target: target.to_string(),
        version: version,
        headers: headers,
    })
}

/// Folds `"\n[ \t]+"` continuations into the previous line with a
/// single space separator, and splits on bare `\n`, trimming a
/// trailing `\r` from each line.
fn unfold_continuations(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if (line.starts_with(' ') || line.starts_with('\t')) && !out.is_empty() {
            let folded = out.last_mut().unwrap();
            folded.push(' ');
            folded.push_str(line.trim());
        } else if !line.is_empty() {
            out.push(line.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_continuation_lines() {
        let lines = unfold_continuations(
            "GET / HTTP/1.1\r\nX-Foo: bar\r\n  baz\r\nHost: x\r\n");
        assert_eq!(lines, vec![
            "GET / HTTP/1.1".to_string(),
            "X-Foo: bar baz".to_string(),
            "Host: x".to_string(),
        ]);
    }

    #[test]
    fn parses_simple_head() {
        let raw = b"GET /hi HTTP/1.1\r\nHost: x\r\nAccept: a\r\nAccept: b\r\n";
        let head = parse_head_bytes(raw).unwrap();
        assert_eq!(head.method, Method::Get);
        assert_eq!(head.target, "/hi");
        assert_eq!(head.version, Version::Http11);
        assert_eq!(head.headers, vec![
            ("Host".to_string(), "x".to_string()),
            ("Accept".to_string(), "a, b".to_string()),
        ]);
    }

    #[test]
    fn rejects_bad_method() {
        let raw = b"FOO / HTTP/1.1\r\n";
        match parse_head_bytes(raw) {
            Err(ParseError::BadMethod) => {}
            other => panic!("expected BadMethod, got {:?}", other),
        }
    }

    #[test]
    fn rejects_bad_suburl() {
        let raw = b"GET http://evil/ HTTP/1.1\r\n";
        match parse_head_bytes(raw) {
            Err(ParseError::BadUri) => {}
            other => panic!("expected BadUri, got {:?}", other),
        }
    }

    #[test]
    fn sub_url_accepts_query_and_punctuation() {
        assert!(is_valid_sub_url("/a/b?x=1&y=2,3!~"));
        assert!(!is_valid_sub_url("not-a-path"));
    }
}
