//! The application contract: `application(env, start_response) -> body`,
//! modeled as a trait plus a small sum type standing in for the three
//! shapes a WSGI-style return value can take.
//!
//! Real applications almost always return a buffered byte string or a
//! list of chunks; the lazy-generator case exists for streaming
//! responses and is the one that needs draining on early termination
//! (component G).

use std::io::{self, Cursor, Write};

use error::HeaderError;
use env::Environment;
use response::{ResponseFramer, StartOutcome};

/// The value an application hands back from its call, corresponding to
/// `AppOutput = Buffered(bytes) | Sequence(Vec<bytes>) | Lazy(iterator)`.
pub enum AppOutput {
    /// A single, fully materialized body.
    Buffered(Vec<u8>),
    /// A pre-split list of chunks, still fully materialized up front.
    Sequence(Vec<Vec<u8>>),
    /// A body produced incrementally; `BodyIter::close` is invoked
    /// exactly once regardless of how iteration ends.
    Lazy(Box<BodyIter>),
}

impl AppOutput {
    /// Total length, if it can be known without consuming a `Lazy` body.
    pub fn known_len(&self) -> Option<usize> {
        match *self {
            AppOutput::Buffered(ref b) => Some(b.len()),
            AppOutput::Sequence(ref chunks) => Some(chunks.iter().map(|c| c.len()).sum()),
            AppOutput::Lazy(_) => None,
        }
    }

    /// Prepends bytes the application passed to `StartResponse::write`
    /// ahead of this body, matching the CGI-style explicit-write half of
    /// the WSGI contract: anything written through the callable
    /// `start_response` returns goes out before the returned iterable.
    /// A no-op when nothing was written that way.
    pub fn with_prelude(self, prelude: Vec<u8>) -> AppOutput {
        if prelude.is_empty() {
            return self;
        }
        match self {
            AppOutput::Buffered(body) => {
                let mut out = prelude;
                out.extend(body);
                AppOutput::Buffered(out)
            }
            AppOutput::Sequence(mut chunks) => {
                chunks.insert(0, prelude);
                AppOutput::Sequence(chunks)
            }
            AppOutput::Lazy(iter) => {
                AppOutput::Lazy(Box::new(PrefixedBody { prelude: Some(prelude), inner: iter }))
            }
        }
    }
}

/// Yields a fixed prelude chunk once, then delegates to `inner`. Backs
/// `AppOutput::with_prelude`'s `Lazy` case.
struct PrefixedBody {
    prelude: Option<Vec<u8>>,
    inner: Box<BodyIter>,
}

impl BodyIter for PrefixedBody {
    fn next(&mut self) -> Option<Vec<u8>> {
        if let Some(chunk) = self.prelude.take() {
            return Some(chunk);
        }
        self.inner.next()
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

/// The application's returned body iterator, for the `Lazy` case.
///
/// Applications are ordinary synchronous Rust code here, matching the
/// WSGI contract's assumption that the app itself does its own
/// blocking: no suspension occurs inside a call other than whatever is
/// implicit in the application's own code. `next` returns `None` on
/// exhaustion; `close` is a separate hook so it still runs when the
/// worker abandons the iterator early (handed to a drain task).
pub trait BodyIter {
    fn next(&mut self) -> Option<Vec<u8>>;
    fn close(&mut self) {}
}

/// Wraps a plain `Iterator` so call sites can hand one to `AppOutput::Lazy`
/// without writing a `BodyIter` impl by hand.
pub struct IterBody<I> {
    inner: I,
}

impl<I> IterBody<I> {
    pub fn new(inner: I) -> IterBody<I> {
        IterBody { inner: inner }
    }
}

impl<I: Iterator<Item = Vec<u8>>> BodyIter for IterBody<I> {
    fn next(&mut self) -> Option<Vec<u8>> {
        self.inner.next()
    }
}

/// The object passed to the application as `start_response`.
///
/// `start` corresponds to calling `start_response(status, headers)`;
/// `write` corresponds to the callable it returns (headers first, then
/// body, in that call order). Data passed to `write` is buffered as
/// a prelude the worker prepends ahead of the returned `AppOutput`, so
/// the old CGI-style explicit-write API and the iterable-return API
/// compose exactly as WSGI specifies.
pub struct StartResponse<'a> {
    framer: &'a mut ResponseFramer,
    is_head: bool,
    prelude: Vec<u8>,
    last_outcome: Option<StartOutcome>,
}

impl<'a> StartResponse<'a> {
    pub fn new(framer: &'a mut ResponseFramer, is_head: bool) -> StartResponse<'a> {
        StartResponse { framer: framer, is_head: is_head, prelude: Vec::new(), last_outcome: None }
    }

    pub fn start(&mut self, status: &str, headers: &[(String, String)])
        -> Result<StartOutcome, HeaderError>
    {
        let outcome = self.framer.start_response(status, headers, self.is_head)?;
        self.last_outcome = Some(outcome);
        Ok(outcome)
    }

    pub fn write(&mut self, data: &[u8]) {
        self.prelude.extend_from_slice(data);
    }

    pub fn has_prelude(&self) -> bool {
        !self.prelude.is_empty()
    }

    pub fn into_prelude(self) -> Vec<u8> {
        self.prelude
    }

    /// What the most recent `start` call resulted in, or `None` if the
    /// application never called it -- a contract violation the worker
    /// treats as an application error.
    pub fn last_outcome(&self) -> Option<StartOutcome> {
        self.last_outcome
    }
}

/// What an application's WebSocket message hook asked the worker to do
/// in response to one inbound message.
pub enum WebSocketAction {
    /// Send a reply message, then keep reading.
    Reply(Vec<u8>),
    /// Keep reading without replying.
    Continue,
    /// Stop the WebSocket loop and close the connection.
    Close,
}

/// `wsgi.input`: a bounded reader over the already-collected request
/// body. The body is read up front by the worker rather than
/// streamed lazily into the application, since the application itself
/// is plain synchronous Rust here rather than a pollable future.
pub type BodyReader = Cursor<Vec<u8>>;

/// The application trait. One request, one call; the worker constructs
/// a fresh `StartResponse` per request and drives whatever `AppOutput`
/// comes back.
pub trait Application {
    fn call(&self, env: &Environment, input: &mut BodyReader, respond: &mut StartResponse)
        -> Result<AppOutput, String>;

    /// Invoked once per inbound WebSocket message, after `start`
    /// returned `StartOutcome::WebSocketUpgrade`. The original source
    /// hands the application a
    /// `WebSocket` object with blocking `read_msg`/`write_msg` methods;
    /// that doesn't fit a poll-driven connection, so here the worker
    /// owns the message loop (component E/F) and calls back into the
    /// application per message instead. Default: close immediately,
    /// for applications that don't opt into WebSocket handling.
    fn on_websocket_message(&self, _env: &Environment, _message: Vec<u8>) -> WebSocketAction {
        WebSocketAction::Close
    }
}

/// `wsgi.errors`: a write-only sink applications can log diagnostics to.
/// Lines are forwarded to this crate's `error!` logging at flush time,
/// matching how the original source's error stream fed the process log
/// rather than the response body.
pub struct ErrorStream {
    pending: String,
}

impl ErrorStream {
    pub fn new() -> ErrorStream {
        ErrorStream { pending: String::new() }
    }
}

impl Write for ErrorStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.push_str(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for line in self.pending.lines() {
            if !line.is_empty() {
                error!("wsgi.errors: {}", line);
            }
        }
        self.pending.clear();
        Ok(())
    }
}

impl Drop for ErrorStream {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Logs an application-contract violation, tagged with which phase of
/// the contract it happened in -- `"start"` for the call itself,
/// `"consume"`/`"consume-close"` for the request-body read path. Rust's
/// `Application::call` and `BodyIter` hooks aren't fallible the way the
/// original source's generator-based equivalents were (no exception to
/// catch from a `close()` hook or a `next()` call), so only the phases
/// that can actually produce an `Err`/a logged fault here are named.
pub fn report_app_exception(phase: &str, msg: &str) {
    error!("application error ({}): {}", phase, msg);
}

/// Answers the Flash cross-domain policy-file probe, a pseudo-request
/// classified before normal HTTP parsing; supplemented from
/// `SendWildcardPolicyFile` in the original source. Not part of the
/// HTTP response state machine: this is raw bytes written directly to
/// the connection before it is closed.
pub fn policy_file_response() -> Vec<u8> {
    b"<cross-domain-policy><allow-access-from domain=\"*\" to-ports=\"*\"/></cross-domain-policy>\0".to_vec()
}

/// The fixed, syntactically-trivial response used for the error fast
/// paths: head-too-long, bad request line, and uncaught application
/// errors before headers were sent. Matches `RespondWithBad` in the
/// original source: `HTTP/1.0`, `Server`, `Date`, `Connection: close`,
/// a plain-text body, and a `Content-Length` that is always correct.
pub fn respond_with_bad(code: u16, reason: &str, body: &str, server_software: &str, date: &str)
    -> Vec<u8>
{
    let payload = body.as_bytes();
    let mut out = Vec::new();
    out.extend_from_slice(format!("HTTP/1.0 {} {}\r\n", code, reason).as_bytes());
    out.extend_from_slice(format!("Server: {}\r\n", server_software).as_bytes());
    out.extend_from_slice(format!("Date: {}\r\n", date).as_bytes());
    out.extend_from_slice(b"Connection: close\r\n");
    out.extend_from_slice(b"Content-Type: text/plain\r\n");
    out.extend_from_slice(format!("Content-Length: {}\r\n", payload.len()).as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_len_sums_sequence_chunks() {
        let out = AppOutput::Sequence(vec![vec![1, 2, 3], vec![4, 5]]);
        assert_eq!(out.known_len(), Some(5));
    }

    #[test]
    fn lazy_has_no_known_len() {
        let out = AppOutput::Lazy(Box::new(IterBody::new(vec![vec![1u8]].into_iter())));
        assert_eq!(out.known_len(), None);
    }

    #[test]
    fn respond_with_bad_has_correct_content_length() {
        let resp = respond_with_bad(400, "Bad Request", "bad request line", "srv", "date");
        let text = String::from_utf8(resp).unwrap();
        assert!(text.starts_with("HTTP/1.0 400 Bad Request\r\n"));
        assert!(text.contains("Server: srv\r\n"));
        assert!(text.contains("Date: date\r\n"));
        assert!(text.contains("Content-Length: 16\r\n"));
        assert!(text.ends_with("bad request line"));
    }

    #[test]
    fn policy_file_response_is_well_formed_xml() {
        let body = policy_file_response();
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("<cross-domain-policy>"));
    }

    #[test]
    fn with_prelude_is_noop_when_empty() {
        let out = AppOutput::Buffered(vec![1, 2, 3]).with_prelude(Vec::new());
        assert_eq!(out.known_len(), Some(3));
    }

    #[test]
    fn with_prelude_prepends_to_buffered_body() {
        let out = AppOutput::Buffered(vec![4, 5]).with_prelude(vec![1, 2, 3]);
        match out {
            AppOutput::Buffered(b) => assert_eq!(b, vec![1, 2, 3, 4, 5]),
            _ => panic!("expected Buffered"),
        }
    }

    #[test]
    fn with_prelude_inserts_leading_chunk_in_sequence() {
        let out = AppOutput::Sequence(vec![vec![4, 5]]).with_prelude(vec![1, 2, 3]);
        match out {
            AppOutput::Sequence(chunks) => assert_eq!(chunks, vec![vec![1, 2, 3], vec![4, 5]]),
            _ => panic!("expected Sequence"),
        }
    }

    #[test]
    fn with_prelude_yields_first_from_lazy_body() {
        let inner = IterBody::new(vec![vec![4, 5]].into_iter());
        let out = AppOutput::Lazy(Box::new(inner)).with_prelude(vec![1, 2, 3]);
        match out {
            AppOutput::Lazy(mut iter) => {
                assert_eq!(iter.next(), Some(vec![1, 2, 3]));
                assert_eq!(iter.next(), Some(vec![4, 5]));
                assert_eq!(iter.next(), None);
            }
            _ => panic!("expected Lazy"),
        }
    }
}
