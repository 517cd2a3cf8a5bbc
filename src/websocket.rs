//! Component E: the WebSocket codec.
//!
//! Implements the draft-75/draft-76 handshake (there is no standardized
//! WSGI binding for WebSocket, so this follows the original source's
//! non-standard carve-out rather than RFC 6455) and the accompanying
//! 0x00/0xFF-delimited and 7-bit length-prefixed frame I/O.
//!
//! Every read function here scans the buffered input before consuming
//! anything, the same way the request-head parser does: a frame is
//! only discarded from the buffer once it is known to be complete, so
//! a function can be safely re-polled after `Async::NotReady` without
//! losing or duplicating bytes.

use std::io;

use byteorder::{BigEndian, ByteOrder};
use futures::{Async, Poll};
use md5;
use tokio_core::io::Io;

use buf_stream::BufStream;
use enums::Version;
use env::{Environment, Scheme};
use error::{Error, WebSocketError};

/// Deny-list plus content-* stripping applied to application-supplied
/// extra headers on the handshake, matching the original source's
/// inline filter (`key not in (..., 'charset', 'upgrade', 'set-cookie')
/// and not key.startswith('proxy-') and not key.startswith('content-')`).
/// Enforced already by `response::ResponseFramer`; this module only
/// consumes the filtered list.
pub fn build_handshake(env: &Environment, extra_headers: &[(String, String)],
    body: Option<[u8; 8]>) -> Result<Vec<u8>, WebSocketError>
{
    let version = if env.version >= Version::Http11 { env.version } else { Version::Http11 };
    let host = env.host().unwrap_or("");
    let origin = env.origin().map(|s| s.to_string())
        .unwrap_or_else(|| format!("http://{}", host));
    let ws_scheme = if env.scheme == Scheme::Https { "wss" } else { "ws" };
    let location = format!("{}://{}{}", ws_scheme, host, env.path());

    let mut out = Vec::new();
    out.extend_from_slice(version.as_str().as_bytes());
    out.extend_from_slice(b" 101 Web Socket Protocol Handshake\r\n");
    out.extend_from_slice(b"Upgrade: WebSocket\r\n");
    out.extend_from_slice(b"Connection: Upgrade\r\n");

    let digest = match (env.websocket_key1.as_ref(), env.websocket_key2.as_ref(), body) {
        (Some(key1), Some(key2), Some(body8)) => {
            push_header(&mut out, "Sec-WebSocket-Origin", &origin);
            push_header(&mut out, "Sec-WebSocket-Location", &location);
            Some(compute_digest(key1, key2, &body8)?)
        }
        _ => {
            push_header(&mut out, "WebSocket-Origin", &origin);
            push_header(&mut out, "WebSocket-Location", &location);
            None
        }
    };

    for &(ref name, ref value) in extra_headers {
        push_header(&mut out, name, value);
    }
    out.extend_from_slice(b"\r\n");
    if let Some(d) = digest {
        out.extend_from_slice(&d);
    }
    Ok(out)
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// MD5 over the two packed 32-bit key numbers plus the 8 trailing body
/// bytes, matching `GetWebSocketKey` in the original source.
fn compute_digest(key1: &str, key2: &str, body8: &[u8; 8]) -> Result<[u8; 16], WebSocketError> {
    let n1 = compute_key_number(key1)?;
    let n2 = compute_key_number(key2)?;
    let mut input = [0u8; 16];
    BigEndian::write_u32(&mut input[0..4], n1);
    BigEndian::write_u32(&mut input[4..8], n2);
    input[8..16].copy_from_slice(body8);
    let digest = md5::compute(&input[..]);
    let mut out = [0u8; 16];
    out.copy_from_slice(&*digest);
    Ok(out)
}

/// Collects a key's digits into a big integer, divides by its space
/// count. Fails if there are no spaces or the digits don't divide
/// evenly -- both indicate a forged or malformed key.
fn compute_key_number(key: &str) -> Result<u32, WebSocketError> {
    let mut number: u64 = 0;
    let mut spaces: u64 = 0;
    for c in key.chars() {
        if c.is_digit(10) {
            number = number.saturating_mul(10).saturating_add(c.to_digit(10).unwrap() as u64);
        } else if c == ' ' {
            spaces += 1;
        }
    }
    if spaces == 0 {
        return Err(WebSocketError::BadHandshakeKey);
    }
    if number % spaces != 0 {
        return Err(WebSocketError::BadHandshakeKey);
    }
    let result = number / spaces;
    if result > u32::max_value() as u64 {
        return Err(WebSocketError::BadHandshakeKey);
    }
    Ok(result as u32)
}

/// Reads one message: a one-byte frame type, then either a
/// `0x00`...`0xFF`-delimited string or a 7-bit length-prefixed blob.
/// `max_size` caps both forms.
pub fn read_message<S: Io>(stream: &mut BufStream<S>, max_size: u64) -> Poll<Vec<u8>, Error> {
    try_ready!(stream.ensure_readable());
    let frame_type = stream.peek(1).expect("ensure_readable guarantees a byte")[0];
    match frame_type {
        0x00 => read_delimited(stream, max_size),
        0xff => read_length_prefixed(stream, max_size),
        other => Err(Error::WebSocket(WebSocketError::InvalidFrameType(other))),
    }
}

fn read_delimited<S: Io>(stream: &mut BufStream<S>, max_size: u64) -> Poll<Vec<u8>, Error> {
    loop {
        let buf = stream.in_buf();
        if buf.len() >= 1 {
            if let Some(rel) = find(&buf[1..], 0xff) {
                let data = buf[1..1 + rel].to_vec();
                stream.discard(1 + rel + 1);
                return Ok(Async::Ready(data));
            }
        }
        if (stream.read_buffer_len() as u64) > max_size + 1 {
            return Err(Error::WebSocket(WebSocketError::MessageTooLarge));
        }
        match grow_or_truncated(stream, stream.read_buffer_len() + 1)? {
            Async::Ready(()) => continue,
            Async::NotReady => return Ok(Async::NotReady),
        }
    }
}

fn read_length_prefixed<S: Io>(stream: &mut BufStream<S>, max_size: u64) -> Poll<Vec<u8>, Error> {
    loop {
        let buf_len = stream.read_buffer_len();
        if buf_len >= 1 {
            if let Some((length, prefix_len)) = scan_length_prefix(&stream.in_buf()[1..]) {
                if length > max_size {
                    return Err(Error::WebSocket(WebSocketError::MessageTooLarge));
                }
                let total = 1 + prefix_len + length as usize;
                match grow_or_truncated(stream, total)? {
                    Async::Ready(()) => {
                        stream.discard(1 + prefix_len);
                        let body = try_ready!(stream.read_exact(length as usize));
                        return Ok(Async::Ready(body));
                    }
                    Async::NotReady => return Ok(Async::NotReady),
                }
            }
        }
        match grow_or_truncated(stream, buf_len + 1)? {
            Async::Ready(()) => continue,
            Async::NotReady => return Ok(Async::NotReady),
        }
    }
}

/// Parses a 7-bits-per-byte length (MSB=continuation), returning the
/// value and how many prefix bytes it occupied, once a terminating
/// (MSB=0) byte has actually arrived.
fn scan_length_prefix(buf: &[u8]) -> Option<(u64, usize)> {
    let mut length: u64 = 0;
    for (i, &b) in buf.iter().enumerate() {
        length = (length << 7) | (b & 0x7f) as u64;
        if b & 0x80 == 0 {
            return Some((length, i + 1));
        }
        if i >= 8 {
            return Some((length, i + 1));
        }
    }
    None
}

fn find(buf: &[u8], needle: u8) -> Option<usize> {
    buf.iter().position(|&b| b == needle)
}

fn grow_or_truncated<S: Io>(stream: &mut BufStream<S>, want: usize) -> Poll<(), Error> {
    match stream.fill_at_least(want) {
        Ok(x) => Ok(x),
        Err(Error::Read(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(Error::WebSocket(WebSocketError::MessageTruncated))
        }
        Err(e) => Err(e),
    }
}

/// Writes a message as `0x00 <utf8 bytes> 0xff`. Fails if the payload
/// itself contains the terminator byte.
pub fn write_message<S: Io>(stream: &mut BufStream<S>, data: &[u8]) -> Result<(), Error> {
    if data.contains(&0xff) {
        return Err(Error::WebSocket(WebSocketError::PayloadContainsTerminator));
    }
    stream.write(&[0x00]);
    stream.write(data);
    stream.write(&[0xff]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_number_divides_by_space_count() {
        assert_eq!(compute_key_number("1  2").unwrap(), 6);
        assert_eq!(compute_key_number("3 4").unwrap(), 17);
    }

    #[test]
    fn key_number_rejects_no_spaces() {
        assert!(compute_key_number("123").is_err());
    }

    #[test]
    fn key_number_rejects_uneven_division() {
        assert!(compute_key_number("7  2").is_err());
    }

    #[test]
    fn write_message_rejects_terminator_byte() {
        use std::io::{Read, Write, Cursor};
        struct MockIo { output: Vec<u8> }
        impl Read for MockIo {
            fn read(&mut self, _b: &mut [u8]) -> io::Result<usize> { Ok(0) }
        }
        impl Write for MockIo {
            fn write(&mut self, b: &[u8]) -> io::Result<usize> {
                self.output.extend_from_slice(b);
                Ok(b.len())
            }
            fn flush(&mut self) -> io::Result<()> { Ok(()) }
        }
        impl Io for MockIo {
            fn poll_read(&mut self) -> Async<()> { Async::Ready(()) }
            fn poll_write(&mut self) -> Async<()> { Async::Ready(()) }
        }
        let _ = Cursor::new(Vec::<u8>::new());
        let mut stream = BufStream::new(MockIo { output: Vec::new() });
        assert!(write_message(&mut stream, b"hi\xffthere").is_err());
        assert!(write_message(&mut stream, b"hi there").is_ok());
    }

    #[test]
    fn scan_length_prefix_single_byte() {
        assert_eq!(scan_length_prefix(&[0x05]), Some((5, 1)));
    }

    #[test]
    fn scan_length_prefix_multi_byte() {
        // 0x81 (continuation, low 7 bits = 1), 0x02 (final, 7 bits = 2)
        // value = (1 << 7) | 2 = 130
        assert_eq!(scan_length_prefix(&[0x81, 0x02]), Some((130, 2)));
    }
}
