//! Drives a `Worker` end to end against an in-memory duplex buffer --
//! no real `TcpStream` involved.

extern crate futures;
extern crate tokio_core;
extern crate tk_wsgi;

use std::io::{self, Cursor, Read, Write};
use std::rc::Rc;

use futures::{Async, Future};
use tokio_core::io::Io;
use tokio_core::reactor::Core;

use tk_wsgi::{
    AppOutput, Application, BodyReader, ConnContext, Environment, Scheme, ServerConfig,
    ServerIdentity, StartResponse, WebSocketAction, Worker,
};
use tk_wsgi::buf_stream::BufStream;

struct DuplexIo {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl Read for DuplexIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for DuplexIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Io for DuplexIo {
    fn poll_read(&mut self) -> Async<()> {
        Async::Ready(())
    }
    fn poll_write(&mut self) -> Async<()> {
        Async::Ready(())
    }
}

struct EchoPathApp;

impl Application for EchoPathApp {
    fn call(&self, env: &Environment, _input: &mut BodyReader, respond: &mut StartResponse)
        -> Result<AppOutput, String>
    {
        let body = env.path().as_bytes().to_vec();
        respond.start("200 OK", &[
            ("Content-Type".to_string(), "text/plain".to_string()),
            ("Content-Length".to_string(), body.len().to_string()),
        ]).map_err(|e| e.to_string())?;
        Ok(AppOutput::Buffered(body))
    }

    fn on_websocket_message(&self, _env: &Environment, _message: Vec<u8>) -> WebSocketAction {
        WebSocketAction::Close
    }
}

fn run_worker(request: &[u8]) -> Vec<u8> {
    let core = Core::new().unwrap();
    let identity = ServerIdentity {
        addr: "127.0.0.1".to_string(),
        name: "127.0.0.1".to_string(),
        port: 8080,
        software: "pts-syncless-wsgi".to_string(),
    };
    let ctx = Rc::new(ConnContext {
        identity: identity,
        config: ServerConfig::new(),
        app: Rc::new(EchoPathApp),
        handle: core.handle(),
    });
    let socket = DuplexIo { input: Cursor::new(request.to_vec()), output: Vec::new() };
    let stream = BufStream::new(socket);
    let mut worker = Worker::new(stream, ctx, "127.0.0.1".to_string(), 9999, Scheme::Http);

    for _ in 0..64 {
        match worker.poll() {
            Ok(Async::Ready(())) => break,
            Ok(Async::NotReady) => continue,
            Err(()) => break,
        }
    }
    let (socket, _unread) = worker.into_stream().into_parts();
    socket.output
}

#[test]
fn get_request_receives_buffered_body_and_closes() {
    let request = b"GET /hello HTTP/1.0\r\nHost: x\r\n\r\n";
    let response = run_worker(request);
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.0 200 OK\r\n"), "{}", text);
    assert!(text.contains("Content-Length: 6\r\n"));
    assert!(text.contains("Connection: close\r\n"));
    assert!(text.ends_with("/hello"));
}

#[test]
fn head_request_strips_content_length_and_body() {
    let request = b"HEAD /abcdef HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n";
    let response = run_worker(request);
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(!text.contains("Content-Length"));
    assert!(text.ends_with("\r\n\r\n"), "HEAD response must carry no body bytes");
}

#[test]
fn bad_request_line_gets_fixed_400_response() {
    let request = b"NOTAMETHOD / HTTP/1.1\r\n\r\n";
    let response = run_worker(request);
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.0 400 Bad Request\r\n"));
    assert!(text.contains("Connection: close\r\n"));
}
