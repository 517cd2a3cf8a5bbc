//! Component F: the worker loop.
//!
//! One `Worker` owns one accepted connection for its whole lifetime:
//! parse a request, build its environment, call the application, frame
//! and write the response, then either read the next pipelined request
//! or close. Implemented as an explicit `Future` state machine: the
//! only places a `poll` call can return `NotReady` are a buffered read,
//! a flush, or an explicit fairness yield between pipelined requests.
//!
//! Applications here are ordinary synchronous Rust: no suspension
//! occurs inside a call other than whatever is implicit in the
//! application's own code, so the request body is fully read up front
//! and handed to the application as an owned, bounded reader rather
//! than a live stream the application would need to poll itself.

use std::io::Cursor;
use std::rc::Rc;

use futures::{Async, Future, Poll};
use futures::task;
use tokio_core::io::Io;
use tokio_core::reactor::Handle;

use app::{self, Application, AppOutput, BodyIter, IterBody, StartResponse, WebSocketAction};
use buf_stream::BufStream;
use body::RequestBody;
use config::ServerConfig;
use date;
use drain::DrainTask;
use enums::{Method, Version};
use env::{self, Environment, Scheme, ServerIdentity};
use error::Error;
use request::{self, ParsedHead, RequestHead};
use response::{BodyWriteOutcome, HeadContext, ResponseFramer, StartOutcome};
use websocket;

/// Per-connection constants shared by every worker on a listener.
pub struct ConnContext<A: Application> {
    pub identity: ServerIdentity,
    pub config: ServerConfig,
    pub app: Rc<A>,
    pub handle: Handle,
}

enum State {
    /// About to read a request head. `first` suppresses the fairness
    /// yield on the very first request of a connection.
    AwaitHead { first: bool },
    ReadBody {
        head: RequestHead,
        env: Environment,
        body: RequestBody,
        collected: Vec<u8>,
    },
    Streaming {
        framer: ResponseFramer,
        iter: Box<BodyIter>,
        /// `None` while still pulling chunks; `Some(keep_alive)` once the
        /// iterator is exhausted and only a final flush remains.
        done: Option<bool>,
    },
    WebSocket { env: Environment },
    Closing,
}

pub struct Worker<S: Io, A: Application> {
    stream: BufStream<S>,
    ctx: Rc<ConnContext<A>>,
    remote_addr: String,
    remote_port: u16,
    scheme: Scheme,
    state: State,
}

impl<S: Io, A: Application> Worker<S, A> {
    /// Takes an already-constructed `BufStream` rather than a bare
    /// socket, so the listener can decide the connection's scheme
    /// (component I) on the same stream before handing it off here --
    /// any bytes peeked during that decision stay in the buffer.
    pub fn new(stream: BufStream<S>, ctx: Rc<ConnContext<A>>, remote_addr: String,
        remote_port: u16, scheme: Scheme) -> Worker<S, A>
    {
        Worker {
            stream: stream,
            ctx: ctx,
            remote_addr: remote_addr,
            remote_port: remote_port,
            scheme: scheme,
            state: State::AwaitHead { first: true },
        }
    }

    /// Gives back the underlying buffered stream, letting a caller (or a
    /// test harness) inspect whatever was written to the socket once the
    /// worker has finished.
    pub fn into_stream(self) -> BufStream<S> {
        self.stream
    }

    fn identity(&self) -> &ServerIdentity {
        &self.ctx.identity
    }

    fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }

    /// Drops back into the reactor immediately, giving other connections
    /// a turn before this one reads its next pipelined request.
    fn yield_now() -> Poll<(), Error> {
        task::park().unpark();
        Ok(Async::NotReady)
    }

    fn abort_with_close(&mut self) {
        self.state = State::Closing;
    }

    /// Writes a fixed response directly (bypassing the framer) and
    /// marks the connection for closing; used for pseudo-requests and
    /// parse failures where there is no well-formed application cycle.
    fn write_fixed_and_close(&mut self, bytes: &[u8]) {
        self.stream.discard_write_buffer();
        self.stream.write(bytes);
        self.abort_with_close();
    }

    fn advance(&mut self) -> Poll<(), Error> {
        loop {
            let state = ::std::mem::replace(&mut self.state, State::Closing);
            match state {
                State::AwaitHead { first } => {
                    if !first {
                        self.state = State::AwaitHead { first: true };
                        return Worker::<S, A>::yield_now();
                    }
                    match try_ready!(request::read_request_head(
                        &mut self.stream, self.config().max_head_bytes))
                    {
                        ParsedHead::TlsClientHello => {
                            self.abort_with_close();
                            return Ok(Async::Ready(()));
                        }
                        ParsedHead::PolicyFileProbe => {
                            self.write_fixed_and_close(&app::policy_file_response());
                        }
                        ParsedHead::Invalid(e) => {
                            debug!("malformed request head: {:?}", e);
                            let date_now = date::now();
                            self.write_fixed_and_close(&app::respond_with_bad(
                                400, "Bad Request", "malformed request",
                                &self.config().server_software, &date_now));
                        }
                        ParsedHead::Normal(head) => {
                            match env::build(&head, self.identity(), &self.remote_addr,
                                self.remote_port, self.scheme)
                            {
                                Ok(env) => {
                                    let body = RequestBody::new(env.content_length);
                                    self.state = State::ReadBody {
                                        head: head, env: env, body: body, collected: Vec::new(),
                                    };
                                }
                                Err(_) => {
                                    let date_now = date::now();
                                    self.write_fixed_and_close(&app::respond_with_bad(
                                        400, "Bad Request", "malformed request",
                                        &self.config().server_software, &date_now));
                                }
                            }
                        }
                    }
                }

                State::ReadBody { head, env, mut body, mut collected } => {
                    if body.is_exhausted() {
                        self.dispatch(head, env, collected);
                        continue;
                    }
                    match body.read(&mut self.stream, 65536) {
                        Ok(Async::Ready(chunk)) => {
                            collected.extend(chunk);
                            self.state = State::ReadBody {
                                head: head, env: env, body: body, collected: collected,
                            };
                        }
                        Ok(Async::NotReady) => {
                            self.state = State::ReadBody {
                                head: head, env: env, body: body, collected: collected,
                            };
                            return Ok(Async::NotReady);
                        }
                        Err(e) => return Err(e),
                    }
                }

                State::Streaming { mut framer, mut iter, mut done } => {
                    if done.is_none() {
                        match iter.next() {
                            Some(chunk) => {
                                match framer.account_body_write(chunk.len()) {
                                    BodyWriteOutcome::WriteAll => self.stream.write(&chunk),
                                    BodyWriteOutcome::Truncate(n) => {
                                        self.stream.write(&chunk[..n]);
                                        error!("application over-produced body past declared \
                                                Content-Length; truncated");
                                    }
                                    BodyWriteOutcome::Nothing => {}
                                }
                            }
                            None => {
                                iter.close();
                                done = Some(framer.finish());
                            }
                        }
                    }
                    match self.stream.flush() {
                        Ok(Async::Ready(())) => {
                            if let Some(keep_alive) = done {
                                if keep_alive {
                                    self.state = State::AwaitHead { first: false };
                                } else {
                                    self.abort_with_close();
                                }
                            } else {
                                self.state = State::Streaming { framer: framer, iter: iter, done: done };
                            }
                        }
                        Ok(Async::NotReady) => {
                            self.state = State::Streaming { framer: framer, iter: iter, done: done };
                            return Ok(Async::NotReady);
                        }
                        Err(e) => return Err(e),
                    }
                }

                State::WebSocket { env } => {
                    match websocket::read_message(&mut self.stream, self.config().max_websocket_message_size) {
                        Ok(Async::Ready(message)) => {
                            match self.ctx.app.on_websocket_message(&env, message) {
                                WebSocketAction::Reply(data) => {
                                    if let Err(e) = websocket::write_message(&mut self.stream, &data) {
                                        debug!("websocket write error: {:?}", e);
                                        self.abort_with_close();
                                        continue;
                                    }
                                    self.state = State::WebSocket { env: env };
                                }
                                WebSocketAction::Continue => {
                                    self.state = State::WebSocket { env: env };
                                }
                                WebSocketAction::Close => {
                                    self.abort_with_close();
                                }
                            }
                        }
                        Ok(Async::NotReady) => {
                            self.state = State::WebSocket { env: env };
                            return Ok(Async::NotReady);
                        }
                        Err(e) => {
                            debug!("websocket read error: {:?}", e);
                            self.abort_with_close();
                        }
                    }
                }

                State::Closing => {
                    match self.stream.flush() {
                        Ok(Async::Ready(())) => return Ok(Async::Ready(())),
                        Ok(Async::NotReady) => return Ok(Async::NotReady),
                        Err(_) => return Ok(Async::Ready(())),
                    }
                }
            }
        }
    }

    /// Invokes the application once the body has been fully collected,
    /// then sets up whatever state follows (streaming body, WebSocket
    /// loop, or a fixed error response). Synchronous end to end: no
    /// suspension point exists inside the application's own call.
    fn dispatch(&mut self, head: RequestHead, env: Environment, body_bytes: Vec<u8>) {
        let is_head = head.method == Method::Head;
        let do_keep_alive = wants_keep_alive(head.version, &head.headers);
        let handshake_body = draft76_handshake_body(&env, &body_bytes);

        let mut framer = ResponseFramer::new();
        let mut input = Cursor::new(body_bytes);
        let result = {
            let mut respond = StartResponse::new(&mut framer, is_head);
            let result = self.ctx.app.call(&env, &mut input, &mut respond);
            (result, respond.last_outcome(), respond.into_prelude())
        };
        let (result, outcome, prelude) = result;

        let output = match result {
            Ok(output) => output.with_prelude(prelude),
            Err(msg) => {
                app::report_app_exception("start", &msg);
                let date_now = date::now();
                self.write_fixed_and_close(&app::respond_with_bad(
                    500, "Internal Server Error", "internal server error",
                    &self.config().server_software, &date_now));
                return;
            }
        };

        match outcome {
            Some(StartOutcome::WebSocketUpgrade) => {
                let extra = framer.take_websocket_headers();
                match websocket::build_handshake(&env, &extra, handshake_body) {
                    Ok(bytes) => {
                        self.stream.write(&bytes);
                        self.state = State::WebSocket { env: env };
                    }
                    Err(e) => {
                        debug!("websocket handshake failed: {:?}", e);
                        self.abort_with_close();
                    }
                }
            }
            Some(StartOutcome::Http) => {
                if let Some(declared) = framer.declared_content_length() {
                    if let Some(produced) = output.known_len() {
                        if produced as u64 != declared {
                            error!("application declared Content-Length {} but produced {} bytes",
                                declared, produced);
                            let date_now = date::now();
                            self.write_fixed_and_close(&app::respond_with_bad(
                                500, "Internal Server Error", "response length mismatch",
                                &self.config().server_software, &date_now));
                            return;
                        }
                    }
                }

                let date_now = date::now();
                let ctx = HeadContext {
                    version: head.version,
                    is_head: is_head,
                    do_request_keep_alive: do_keep_alive,
                    server_software: &self.config().server_software,
                    date: &date_now,
                };
                let (head_bytes, keep_alive) = framer.emit_head(&ctx);
                self.stream.write(&head_bytes);

                if is_head {
                    if let AppOutput::Lazy(iter) = output {
                        self.ctx.handle.spawn(DrainTask::new(iter));
                    }
                    let keep_alive = framer.finish_head_request(keep_alive);
                    if keep_alive {
                        self.state = State::AwaitHead { first: false };
                    } else {
                        self.abort_with_close();
                    }
                } else {
                    let iter = into_body_iter(output);
                    self.state = State::Streaming { framer: framer, iter: iter, done: None };
                }
            }
            None => {
                error!("application never called start_response");
                let date_now = date::now();
                self.write_fixed_and_close(&app::respond_with_bad(
                    500, "Internal Server Error", "application contract violation",
                    &self.config().server_software, &date_now));
            }
        }
    }
}

/// If this request carried a draft-76 handshake key pair, the 8 body
/// bytes that feed the MD5 digest were captured as the collected
/// request body (`env::build` sets `content_length = Some(8)` for
/// exactly this case).
fn draft76_handshake_body(env: &Environment, body_bytes: &[u8]) -> Option<[u8; 8]> {
    if env.websocket_key1.is_some() && env.websocket_key2.is_some() && body_bytes.len() >= 8 {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&body_bytes[..8]);
        Some(arr)
    } else {
        None
    }
}

fn into_body_iter(output: AppOutput) -> Box<BodyIter> {
    match output {
        AppOutput::Buffered(bytes) => Box::new(IterBody::new(vec![bytes].into_iter())),
        AppOutput::Sequence(chunks) => Box::new(IterBody::new(chunks.into_iter())),
        AppOutput::Lazy(iter) => iter,
    }
}

/// `Connection` negotiation: exact tokens `close`/`Keep-Alive`, matched
/// case-insensitively on parse.
fn wants_keep_alive(version: Version, headers: &[(String, String)]) -> bool {
    for &(ref name, ref value) in headers {
        if name.eq_ignore_ascii_case("connection") {
            if value.eq_ignore_ascii_case("close") {
                return false;
            }
            if value.eq_ignore_ascii_case("keep-alive") {
                return true;
            }
        }
    }
    version.default_keep_alive()
}

impl<S: Io, A: Application> Future for Worker<S, A> {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        match self.advance() {
            Ok(progress) => Ok(progress),
            Err(e) => {
                debug!("connection dropped: {:?}", e);
                Ok(Async::Ready(()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enums::Version;

    #[test]
    fn connection_close_overrides_http11_default() {
        let headers = vec![("Connection".to_string(), "close".to_string())];
        assert!(!wants_keep_alive(Version::Http11, &headers));
    }

    #[test]
    fn http10_defaults_to_close_without_header() {
        assert!(!wants_keep_alive(Version::Http10, &[]));
    }

    #[test]
    fn http10_keep_alive_header_is_honored() {
        let headers = vec![("Connection".to_string(), "Keep-Alive".to_string())];
        assert!(wants_keep_alive(Version::Http10, &headers));
    }
}
