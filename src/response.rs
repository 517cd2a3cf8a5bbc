//! Component D: the response framer.
//!
//! Buffers status + headers until the first body byte is ready (or
//! until the application returns having declared `Content-Length: 0`),
//! validates header syntax, enforces `Content-Length` accounting,
//! decides keep-alive, and distinguishes `HEAD`.
//!
//! State machine: `NotStarted -> Buffered -> Streaming -> Done`. A
//! `start_response` call while `Buffered` (i.e. a second call before
//! any body byte) resets back to a fresh `Buffered`: the last call
//! wins.

use std::ascii::AsciiExt;

use enums::Version;
use error::HeaderError;

/// Header names the worker strips unconditionally; the framer never
/// lets the application set these directly.
fn is_denied(name_lower: &str) -> bool {
    name_lower == "status" || name_lower == "server" || name_lower == "date" ||
        name_lower == "connection" || name_lower.starts_with("proxy-")
}

fn is_head_only_denied(name_lower: &str) -> bool {
    name_lower == "content-length" || name_lower == "content-transfer-encoding"
}

/// Deny-list applied to application-supplied headers on the `WebSocket`
/// branch: broader than the ordinary deny-list since the handshake
/// owns `upgrade`/`connection` and has no body to carry `content-*`
/// headers for.
fn is_websocket_denied(name_lower: &str) -> bool {
    is_denied(name_lower) || name_lower == "charset" || name_lower == "upgrade" ||
        name_lower == "set-cookie" || name_lower.starts_with("content-")
}

fn valid_header_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphabetic() || c == '-')
}

fn valid_header_value(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b >= 0x20 && b <= 0x7e)
}

fn valid_status_line(status: &str) -> bool {
    let bytes = status.as_bytes();
    if bytes.len() < 5 {
        return false;
    }
    let code_ok = bytes[0] >= b'2' && bytes[0] <= b'5' &&
        bytes[1].is_ascii_digit() && bytes[2].is_ascii_digit();
    if !code_ok || bytes[3] != b' ' {
        return false;
    }
    let phrase = &status[4..];
    match phrase.chars().next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    phrase.bytes().all(|b| b >= 0x20 && b <= 0x7e)
}

/// A validated, not-yet-flushed response head.
#[derive(Debug, Clone)]
struct Buffered {
    status: String,
    headers: Vec<(String, String)>,
    content_length: Option<u64>,
}

#[derive(Debug)]
enum State {
    NotStarted,
    Buffered(Buffered),
    Streaming { content_length_remaining: Option<u64>, keep_alive: bool },
    Done { keep_alive: bool },
}

/// What the application asked for when it called `start_response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A normal HTTP response; framing continues as usual.
    Http,
    /// Status was the literal `"WebSocket"`: the HTTP response lifecycle
    /// ends here and the worker hands the connection to component E.
    WebSocketUpgrade,
}

/// Per-request context the framer needs to emit a head; supplied by the
/// worker, which owns the request-level facts.
pub struct HeadContext<'a> {
    pub version: Version,
    pub is_head: bool,
    pub do_request_keep_alive: bool,
    pub server_software: &'a str,
    pub date: &'a str,
}

/// Outcome of writing one chunk of body through `account_body_write`.
#[derive(Debug, PartialEq, Eq)]
pub enum BodyWriteOutcome {
    /// Write the whole chunk; no truncation needed.
    WriteAll,
    /// Write only the first `n` bytes; the response is now over-long
    /// and keep-alive has been disabled.
    Truncate(usize),
    /// Nothing more should be written; the cap was already reached on
    /// a previous call.
    Nothing,
}

pub struct ResponseFramer {
    state: State,
}

impl ResponseFramer {
    pub fn new() -> ResponseFramer {
        ResponseFramer { state: State::NotStarted }
    }

    pub fn is_started(&self) -> bool {
        !matches!(self.state, State::NotStarted)
    }

    pub fn is_streaming_or_done(&self) -> bool {
        matches!(self.state, State::Streaming { .. } | State::Done { .. })
    }

    pub fn declared_content_length(&self) -> Option<u64> {
        match self.state {
            State::Buffered(ref b) => b.content_length,
            State::Streaming { content_length_remaining, .. } => content_length_remaining,
            _ => None,
        }
    }

    /// Takes ownership of the application-supplied headers buffered on
    /// the `WebSocket` branch, so the worker can fold them into the
    /// handshake response. Panics if called outside that branch; the
    /// worker only calls this right after observing
    /// `StartOutcome::WebSocketUpgrade`.
    pub fn take_websocket_headers(&mut self) -> Vec<(String, String)> {
        match ::std::mem::replace(&mut self.state, State::Done { keep_alive: false }) {
            State::Buffered(b) => b.headers,
            other => panic!("take_websocket_headers called in state {:?}", other),
        }
    }

    /// Implements `start_response(status, headers[, exc_info])`.
    ///
    /// `exc_info` itself is not modeled: in this crate a later call
    /// simply discards the earlier buffered head, which is exactly what
    /// the WSGI "error handler calls start_response again" pattern
    /// relies on.
    pub fn start_response(&mut self, status: &str, headers: &[(String, String)],
        is_head: bool) -> Result<StartOutcome, HeaderError>
    {
        if status == "WebSocket" {
            let mut extra = Vec::with_capacity(headers.len());
            for &(ref name, ref value) in headers {
                let lower = name.to_ascii_lowercase();
                if is_websocket_denied(&lower) {
                    continue;
                }
                if !valid_header_name(name) {
                    return Err(HeaderError::BadHeaderName(name.clone()));
                }
                if !valid_header_value(value) {
                    return Err(HeaderError::BadHeaderValue(name.clone(), value.clone()));
                }
                extra.push((capitalize_header(name), value.trim().to_string()));
            }
            self.state = State::Buffered(Buffered {
                status: status.to_string(),
                headers: extra,
                content_length: None,
            });
            return Ok(StartOutcome::WebSocketUpgrade);
        }

        if !valid_status_line(status) {
            return Err(HeaderError::BadStatus(status.to_string()));
        }

        let mut out_headers = Vec::with_capacity(headers.len());
        let mut content_length = None;
        for &(ref name, ref value) in headers {
            let lower = name.to_ascii_lowercase();
            if is_denied(&lower) {
                continue;
            }
            if is_head && is_head_only_denied(&lower) {
                continue;
            }
            if lower == "content-length" {
                let n: u64 = value.trim().parse()
                    .map_err(|_| HeaderError::BadContentLength(value.clone()))?;
                content_length = Some(n);
                continue;
            }
            if !valid_header_name(name) {
                return Err(HeaderError::BadHeaderName(name.clone()));
            }
            if !valid_header_value(value) {
                return Err(HeaderError::BadHeaderValue(name.clone(), value.clone()));
            }
            out_headers.push((capitalize_header(name), value.trim().to_string()));
        }

        self.state = State::Buffered(Buffered {
            status: status.to_string(),
            headers: out_headers,
            content_length: content_length,
        });
        Ok(StartOutcome::Http)
    }

    /// Transitions `Buffered -> Streaming`, returning the bytes to push
    /// into the write buffer (status line, `Server`/`Date`, the
    /// buffered headers, the `Connection:` decision, and the blank
    /// line) plus whether keep-alive was granted.
    ///
    /// Keep-alive is granted only when the client asked for it *and* a
    /// `Content-Length` was declared: the response length must be
    /// well-defined for the connection to be reused.
    pub fn emit_head(&mut self, ctx: &HeadContext) -> (Vec<u8>, bool) {
        let buffered = match ::std::mem::replace(&mut self.state, State::NotStarted) {
            State::Buffered(b) => b,
            other => panic!("emit_head called in state {:?}", other),
        };
        let keep_alive = ctx.do_request_keep_alive && buffered.content_length.is_some();

        let mut out = Vec::new();
        out.extend_from_slice(ctx.version.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(buffered.status.as_bytes());
        out.extend_from_slice(b"\r\n");
        push_header(&mut out, "Server", ctx.server_software);
        push_header(&mut out, "Date", ctx.date);
        if !ctx.is_head {
            if let Some(n) = buffered.content_length {
                push_header(&mut out, "Content-Length", &n.to_string());
            }
        }
        for &(ref name, ref value) in &buffered.headers {
            push_header(&mut out, name, value);
        }
        push_header(&mut out, "Connection", if keep_alive { "Keep-Alive" } else { "close" });
        out.extend_from_slice(b"\r\n");

        self.state = State::Streaming {
            content_length_remaining: buffered.content_length,
            keep_alive: keep_alive,
        };
        (out, keep_alive)
    }

    /// Accounts for `len` bytes about to be written to the body.
    /// Returns how many of them should actually reach the socket.
    pub fn account_body_write(&mut self, len: usize) -> BodyWriteOutcome {
        match self.state {
            State::Streaming { ref mut content_length_remaining, ref mut keep_alive } => {
                match *content_length_remaining {
                    None => BodyWriteOutcome::WriteAll,
                    Some(remaining) => {
                        if remaining == 0 {
                            if len > 0 {
                                *keep_alive = false;
                            }
                            BodyWriteOutcome::Nothing
                        } else if (len as u64) <= remaining {
                            *content_length_remaining = Some(remaining - len as u64);
                            BodyWriteOutcome::WriteAll
                        } else {
                            *content_length_remaining = Some(0);
                            *keep_alive = false;
                            BodyWriteOutcome::Truncate(remaining as usize)
                        }
                    }
                }
            }
            _ => panic!("account_body_write called before streaming"),
        }
    }

    pub fn current_keep_alive(&self) -> bool {
        match self.state {
            State::Streaming { keep_alive, .. } => keep_alive,
            State::Done { keep_alive } => keep_alive,
            _ => false,
        }
    }

    /// Transitions `Streaming -> Done`. If fewer bytes were produced
    /// than declared, the connection must be closed even though
    /// `keep_alive` may still read `true` from the accounting above.
    pub fn finish(&mut self) -> bool {
        let keep_alive = match self.state {
            State::Streaming { content_length_remaining, keep_alive } => {
                keep_alive && content_length_remaining.unwrap_or(0) == 0
            }
            State::Done { keep_alive } => keep_alive,
            State::NotStarted | State::Buffered(_) => false,
        };
        self.state = State::Done { keep_alive: keep_alive };
        keep_alive
    }

    /// `Done` transition for `HEAD`: the body is never produced at all
    /// by design, so the under-production check in `finish` doesn't
    /// apply -- whatever `emit_head` decided stands.
    pub fn finish_head_request(&mut self, keep_alive: bool) -> bool {
        self.state = State::Done { keep_alive: keep_alive };
        keep_alive
    }
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// `Word-Capitalizes-Every-Dash-Segment`, matching
/// `HEADER_WORD_LOWER_LETTER_RE` in the original source.
fn capitalize_header(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut cap_next = true;
    for c in name.chars() {
        if cap_next {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        cap_next = c == '-';
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(server: &'a str, date: &'a str) -> HeadContext<'a> {
        HeadContext {
            version: Version::Http11,
            is_head: false,
            do_request_keep_alive: true,
            server_software: server,
            date: date,
        }
    }

    #[test]
    fn validates_status_line() {
        assert!(valid_status_line("200 OK"));
        assert!(valid_status_line("404 Not Found"));
        assert!(!valid_status_line("200 ok"));
        assert!(!valid_status_line("999 Nope"));
    }

    #[test]
    fn capitalizes_header_names() {
        assert_eq!(capitalize_header("content-type"), "Content-Type");
        assert_eq!(capitalize_header("X-MY-HEADER"), "X-My-Header");
    }

    #[test]
    fn keep_alive_requires_content_length() {
        let mut framer = ResponseFramer::new();
        framer.start_response("200 OK", &[
            ("Content-Type".to_string(), "text/plain".to_string()),
        ], false).unwrap();
        let (_, keep_alive) = framer.emit_head(&ctx("srv", "date"));
        assert!(!keep_alive, "no Content-Length means no keep-alive");
    }

    #[test]
    fn keep_alive_granted_with_content_length() {
        let mut framer = ResponseFramer::new();
        framer.start_response("200 OK", &[
            ("Content-Length".to_string(), "13".to_string()),
        ], false).unwrap();
        let (head, keep_alive) = framer.emit_head(&ctx("srv", "date"));
        assert!(keep_alive);
        let text = String::from_utf8(head).unwrap();
        assert!(text.contains("Connection: Keep-Alive"));
        assert!(text.contains("Content-Length: 13"));
    }

    #[test]
    fn over_production_truncates_and_drops_keep_alive() {
        let mut framer = ResponseFramer::new();
        framer.start_response("200 OK", &[
            ("Content-Length".to_string(), "5".to_string()),
        ], false).unwrap();
        framer.emit_head(&ctx("srv", "date"));
        assert_eq!(framer.account_body_write(5), BodyWriteOutcome::WriteAll);
        assert_eq!(framer.account_body_write(6), BodyWriteOutcome::Truncate(0));
        assert!(!framer.current_keep_alive());
    }

    #[test]
    fn second_start_response_resets_buffered_head() {
        let mut framer = ResponseFramer::new();
        framer.start_response("200 OK", &[
            ("Content-Type".to_string(), "text/plain".to_string()),
        ], false).unwrap();
        framer.start_response("500 Internal Server Error", &[], false).unwrap();
        let (head, _) = framer.emit_head(&ctx("srv", "date"));
        let text = String::from_utf8(head).unwrap();
        assert!(text.starts_with("HTTP/1.1 500 Internal Server Error"));
        assert!(!text.contains("Content-Type"));
    }

    #[test]
    fn head_request_strips_content_length_header_and_withholds_keep_alive() {
        let mut framer = ResponseFramer::new();
        framer.start_response("200 OK", &[
            ("Content-Length".to_string(), "13".to_string()),
        ], true).unwrap();
        let mut c = ctx("srv", "date");
        c.is_head = true;
        let (head, keep_alive) = framer.emit_head(&c);
        let text = String::from_utf8(head).unwrap();
        assert!(!keep_alive, "HEAD never declares a body length, so no keep-alive");
        assert!(!text.contains("Content-Length"));
    }

    #[test]
    fn head_request_strips_content_transfer_encoding_header() {
        let mut framer = ResponseFramer::new();
        framer.start_response("200 OK", &[
            ("Content-Length".to_string(), "13".to_string()),
            ("Content-Transfer-Encoding".to_string(), "chunked".to_string()),
        ], true).unwrap();
        let mut c = ctx("srv", "date");
        c.is_head = true;
        let (head, _) = framer.emit_head(&c);
        let text = String::from_utf8(head).unwrap();
        assert!(!text.contains("Content-Transfer-Encoding"));
    }
}
