//! Component I: the upgrade decision.
//!
//! Decides, per accepted connection, whether it speaks plaintext or
//! TLS, and whether `wsgi.url_scheme`/`HTTPS` should read `https`/`on`.
//! Grounded in `SslUpgrader` in the original source: `use_http=True`
//! peeks one byte and falls back to plaintext when it doesn't look like
//! a TLS record; `use_http=False` always upgrades.
//!
//! Actually performing a TLS handshake is out of scope here (a stated
//! non-goal); this module owns the *decision* (peek + scheme bookkeeping)
//! and hands the wrap itself to a caller-supplied `Acceptor`, exactly as
//! the original took a pluggable `upgrade_ssl_callback`.

use futures::{Async, Poll};
use tokio_core::io::Io;

use buf_stream::BufStream;
use env::Scheme;
use error::Error;

/// Mirrors `SslUpgrader.use_http`: `MaybeEncrypt` accepts both schemes
/// on the same port by peeking; `ForceEncrypt` always upgrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    MaybeEncrypt,
    ForceEncrypt,
}

/// Peeks the first byte (without consuming it) to decide the scheme.
/// `0x16` is a TLS handshake record; `0x80` is an SSLv2 ClientHello.
pub fn decide_scheme<S: Io>(stream: &mut BufStream<S>, mode: Mode) -> Poll<Scheme, Error> {
    match mode {
        Mode::ForceEncrypt => Ok(Async::Ready(Scheme::Https)),
        Mode::MaybeEncrypt => {
            try_ready!(stream.ensure_readable());
            let first = stream.peek(1).expect("ensure_readable guarantees a byte")[0];
            match first {
                0x16 | 0x80 => Ok(Async::Ready(Scheme::Https)),
                _ => Ok(Async::Ready(Scheme::Http)),
            }
        }
    }
}

/// Wraps a plaintext socket in an encrypted stream once `decide_scheme`
/// has returned `Https`. A failed handshake returns `None`, which the
/// listener treats as "drop this connection silently", matching the
/// original's `except IOError_all: return` (no response).
pub trait Acceptor<S: Io> {
    type Stream: Io;
    fn accept(&self, socket: S) -> Option<Self::Stream>;
}

/// The no-op acceptor: used for `Mode::MaybeEncrypt` connections that
/// peeked as plaintext, and by embedders that never configured TLS.
pub struct NoEncryption;

impl<S: Io> Acceptor<S> for NoEncryption {
    type Stream = S;
    fn accept(&self, socket: S) -> Option<S> {
        Some(socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self as stdio, Read, Write, Cursor};

    struct MockIo {
        input: Cursor<Vec<u8>>,
    }
    impl Read for MockIo {
        fn read(&mut self, buf: &mut [u8]) -> stdio::Result<usize> { self.input.read(buf) }
    }
    impl Write for MockIo {
        fn write(&mut self, buf: &[u8]) -> stdio::Result<usize> { Ok(buf.len()) }
        fn flush(&mut self) -> stdio::Result<()> { Ok(()) }
    }
    impl Io for MockIo {
        fn poll_read(&mut self) -> Async<()> { Async::Ready(()) }
        fn poll_write(&mut self) -> Async<()> { Async::Ready(()) }
    }

    fn mock(first_byte: u8) -> BufStream<MockIo> {
        BufStream::new(MockIo { input: Cursor::new(vec![first_byte, 0, 0]) })
    }

    #[test]
    fn maybe_encrypt_detects_tls_record() {
        let mut s = mock(0x16);
        match decide_scheme(&mut s, Mode::MaybeEncrypt).unwrap() {
            Async::Ready(Scheme::Https) => {}
            other => panic!("expected Https, got {:?}", other),
        }
    }

    #[test]
    fn maybe_encrypt_passes_through_plaintext() {
        let mut s = mock(b'G');
        match decide_scheme(&mut s, Mode::MaybeEncrypt).unwrap() {
            Async::Ready(Scheme::Http) => {}
            other => panic!("expected Http, got {:?}", other),
        }
    }

    #[test]
    fn force_encrypt_always_https() {
        let mut s = mock(b'G');
        match decide_scheme(&mut s, Mode::ForceEncrypt).unwrap() {
            Async::Ready(Scheme::Https) => {}
            other => panic!("expected Https, got {:?}", other),
        }
    }
}
