//! Component A: the buffered stream adapter.
//!
//! Wraps a `tokio_core::io::Io` socket with a read buffer and a write
//! buffer, and exposes the small set of blocking-style primitives the
//! parser, framer and WebSocket codec are built on: `read_until`,
//! `peek`, `discard`, `write`, `flush`. Every one of these suspends the
//! calling future (by returning `Async::NotReady`) rather than block the
//! reactor thread: all blocking goes through the event loop.
//!
//! The stream is single-consumer: nothing here is `Sync`, and there is
//! no internal buffering across tasks.

use std::io::{self, Read, Write};

use futures::{Async, Poll};
use tokio_core::io::Io;

use buf::Buf;
use error::Error;

/// Sentinel written to `write_buffer_limit` meaning "buffer freely,
/// flush only when explicitly asked". This mirrors the literal `2`
/// used by the original source for the same purpose.
pub const BUFFER_FREELY: usize = 2;
/// Sentinel meaning "flush after every `write()`" (autoflush), used
/// once the first response body byte has been produced.
pub const AUTOFLUSH: usize = 0;

pub struct BufStream<S: Io> {
    sock: S,
    in_buf: Buf,
    out_buf: Buf,
    write_buffer_limit: usize,
    read_eof: bool,
}

impl<S: Io> BufStream<S> {
    pub fn new(sock: S) -> BufStream<S> {
        BufStream {
            sock: sock,
            in_buf: Buf::new(),
            out_buf: Buf::new(),
            write_buffer_limit: BUFFER_FREELY,
            read_eof: false,
        }
    }

    pub fn read_buffer_len(&self) -> usize {
        self.in_buf.len()
    }

    pub fn write_buffer_len(&self) -> usize {
        self.out_buf.len()
    }

    pub fn write_buffer_limit(&self) -> usize {
        self.write_buffer_limit
    }

    pub fn set_write_buffer_limit(&mut self, n: usize) {
        self.write_buffer_limit = n;
    }

    /// Appends bytes to the write buffer. Does not itself flush; callers
    /// decide when to flush based on `write_buffer_limit` (component D
    /// owns that policy).
    pub fn write(&mut self, data: &[u8]) {
        self.out_buf.extend(data);
    }

    pub fn discard_write_buffer(&mut self) {
        let n = self.out_buf.len();
        self.out_buf.consume(n);
    }

    /// Returns up to `n` bytes without consuming them, if that many are
    /// already buffered. Does not itself try to read more -- callers
    /// loop `fill()` until this succeeds or treat `NotReady` specially.
    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        if self.in_buf.len() >= n { Some(&self.in_buf[..n]) } else { None }
    }

    pub fn discard(&mut self, n: usize) {
        self.in_buf.consume(n);
    }

    /// Pulls more bytes into the read buffer. `Async::Ready(true)` means
    /// EOF was observed (0-byte read); `Ready(false)` means some bytes
    /// arrived; `NotReady` means the socket would block.
    fn fill(&mut self) -> Poll<bool, io::Error> {
        if self.read_eof {
            return Ok(Async::Ready(true));
        }
        if self.sock.poll_read().is_not_ready() {
            return Ok(Async::NotReady);
        }
        match self.in_buf.fill_from(&mut self.sock, 4096) {
            Ok(0) => {
                self.read_eof = true;
                Ok(Async::Ready(true))
            }
            Ok(_) => Ok(Async::Ready(false)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                Ok(Async::NotReady)
            }
            Err(e) => Err(e),
        }
    }

    /// Reads until `byte` is found (exclusive), discarding the
    /// terminator. Fails with an I/O "unexpected eof" error if the
    /// stream ends first.
    pub fn read_until(&mut self, byte: u8) -> Poll<Vec<u8>, Error> {
        loop {
            if let Some(pos) = self.in_buf.find(byte) {
                let mut data = Vec::with_capacity(pos);
                data.extend_from_slice(&self.in_buf[..pos]);
                self.in_buf.consume(pos + 1);
                return Ok(Async::Ready(data));
            }
            match try!(self.fill()) {
                Async::Ready(true) => {
                    return Err(Error::Read(unexpected_eof()));
                }
                Async::Ready(false) => continue,
                Async::NotReady => return Ok(Async::NotReady),
            }
        }
    }

    /// Reads exactly `n` bytes.
    pub fn read_exact(&mut self, n: usize) -> Poll<Vec<u8>, Error> {
        loop {
            if self.in_buf.len() >= n {
                let data = self.in_buf[..n].to_vec();
                self.in_buf.consume(n);
                return Ok(Async::Ready(data));
            }
            match try!(self.fill()) {
                Async::Ready(true) => {
                    return Err(Error::Read(unexpected_eof()));
                }
                Async::Ready(false) => continue,
                Async::NotReady => return Ok(Async::NotReady),
            }
        }
    }

    /// Ensures at least one byte is available to `peek`/pattern-match
    /// against, without consuming it. Used by the parser to classify
    /// pseudo-requests from the first byte.
    pub fn ensure_readable(&mut self) -> Poll<(), Error> {
        if !self.in_buf.is_empty() {
            return Ok(Async::Ready(()));
        }
        match try!(self.fill()) {
            Async::Ready(true) => Err(Error::Read(unexpected_eof())),
            Async::Ready(false) => Ok(Async::Ready(())),
            Async::NotReady => Ok(Async::NotReady),
        }
    }

    /// Keeps pulling more input until at least `n` bytes are buffered
    /// or a blank-line terminator condition is met; used by the request
    /// parser to grow the head buffer under its size cap.
    pub fn fill_at_least(&mut self, n: usize) -> Poll<(), Error> {
        loop {
            if self.in_buf.len() >= n {
                return Ok(Async::Ready(()));
            }
            match try!(self.fill()) {
                Async::Ready(true) => return Err(Error::Read(unexpected_eof())),
                Async::Ready(false) => continue,
                Async::NotReady => return Ok(Async::NotReady),
            }
        }
    }

    pub fn in_buf(&self) -> &Buf {
        &self.in_buf
    }

    /// Splits the stream back into its raw socket and whatever input
    /// bytes were already read but not yet consumed. Used by the
    /// listener when a connection's scheme decision (component I) needs
    /// to hand the bare socket to an `Acceptor`, without losing the
    /// bytes that were peeked to make that decision.
    pub fn into_parts(self) -> (S, Vec<u8>) {
        (self.sock, self.in_buf[..].to_vec())
    }

    /// Rebuilds a stream around a (possibly just-accepted) socket,
    /// seeding its read buffer with bytes carried over from a prior
    /// `into_parts` call.
    pub fn with_primed(sock: S, prefix: Vec<u8>) -> BufStream<S> {
        let mut stream = BufStream::new(sock);
        stream.in_buf.extend(&prefix);
        stream
    }

    /// Flushes the write buffer to the socket. May need several polls
    /// to drain a large buffer through a congested socket.
    pub fn flush(&mut self) -> Poll<(), Error> {
        while !self.out_buf.is_empty() {
            if self.sock.poll_write().is_not_ready() {
                return Ok(Async::NotReady);
            }
            match self.sock.write(&self.out_buf[..]) {
                Ok(0) => {
                    return Err(Error::Write(io::Error::new(
                        io::ErrorKind::WriteZero, "write returned zero")));
                }
                Ok(n) => self.out_buf.consume(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Async::NotReady);
                }
                Err(e) => return Err(Error::Write(e)),
            }
        }
        Ok(Async::Ready(()))
    }
}

fn unexpected_eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "unexpected end of stream")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::Shutdown;

    /// A minimal in-memory `Io` for tests: reads from a fixed buffer,
    /// writes into a growable `Vec`.
    struct MockIo {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for MockIo {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }
    impl Write for MockIo {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
    impl Io for MockIo {
        fn poll_read(&mut self) -> Async<()> {
            Async::Ready(())
        }
        fn poll_write(&mut self) -> Async<()> {
            Async::Ready(())
        }
    }
    impl MockIo {
        fn shutdown(&mut self, _how: Shutdown) -> io::Result<()> { Ok(()) }
    }

    fn mock(input: &[u8]) -> BufStream<MockIo> {
        BufStream::new(MockIo { input: Cursor::new(input.to_vec()), output: Vec::new() })
    }

    #[test]
    fn read_until_finds_terminator() {
        let mut s = mock(b"GET / HTTP/1.1\r\n");
        match s.read_until(b'\n').unwrap() {
            Async::Ready(data) => assert_eq!(data, b"GET / HTTP/1.1\r"),
            Async::NotReady => panic!("expected ready"),
        }
    }

    #[test]
    fn write_then_flush_roundtrip() {
        let mut s = mock(b"");
        s.write(b"hello");
        assert_eq!(s.write_buffer_len(), 5);
        s.flush().unwrap();
        assert_eq!(s.write_buffer_len(), 0);
        assert_eq!(&s.sock.output, b"hello");
    }
}
