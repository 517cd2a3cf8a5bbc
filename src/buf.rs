//! A small growable byte buffer used on both sides of `BufStream`.
//!
//! Kept in-tree rather than pulled in from a separate buffer crate: the
//! buffered-stream layer here is a hand-rolled component that owns its
//! own minimal buffer.

use std::io::{self, Read};
use std::ops::{Deref, DerefMut};

#[derive(Debug, Default)]
pub struct Buf {
    data: Vec<u8>,
    start: usize,
}

impl Buf {
    pub fn new() -> Buf {
        Buf { data: Vec::new(), start: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `data` to the buffer, compacting first if the consumed
    /// prefix has grown large relative to the live tail.
    pub fn extend(&mut self, data: &[u8]) {
        self.compact_if_wasteful();
        self.data.extend_from_slice(data);
    }

    /// Drops the first `n` bytes. Panics if `n > self.len()`, mirroring
    /// `netbuf::Buf::consume`.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len(), "consume({}) > len({})", n, self.len());
        self.start += n;
        if self.start == self.data.len() {
            self.data.clear();
            self.start = 0;
        }
    }

    /// Position of the first occurrence of `byte`, if any, relative to
    /// the start of the live data.
    pub fn find(&self, byte: u8) -> Option<usize> {
        self[..].iter().position(|&b| b == byte)
    }

    /// Reads one chunk of at least `min` spare bytes from `reader` and
    /// appends whatever it returns. Returns `0` on EOF, same as
    /// `Read::read`. `WouldBlock` is propagated for the caller to turn
    /// into `Async::NotReady`.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R, min: usize)
        -> io::Result<usize>
    {
        self.compact_if_wasteful();
        let before = self.data.len();
        let want = before + min.max(4096);
        self.data.resize(want, 0);
        match reader.read(&mut self.data[before..]) {
            Ok(n) => {
                self.data.truncate(before + n);
                Ok(n)
            }
            Err(e) => {
                self.data.truncate(before);
                Err(e)
            }
        }
    }

    fn compact_if_wasteful(&mut self) {
        if self.start > 0 && self.start * 2 > self.data.len() {
            self.data.drain(..self.start);
            self.start = 0;
        }
    }
}

impl Deref for Buf {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.data[self.start..]
    }
}

impl DerefMut for Buf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_and_consume() {
        let mut buf = Buf::new();
        buf.extend(b"hello world");
        assert_eq!(&buf[..5], b"hello");
        buf.consume(6);
        assert_eq!(&buf[..], b"world");
    }

    #[test]
    fn find() {
        let mut buf = Buf::new();
        buf.extend(b"GET / HTTP/1.1\r\n");
        assert_eq!(buf.find(b'\r'), Some(14));
        assert_eq!(buf.find(b'Z'), None);
    }

    #[test]
    fn compacts_after_heavy_consume() {
        let mut buf = Buf::new();
        buf.extend(b"0123456789");
        buf.consume(9);
        buf.extend(b"abc");
        assert_eq!(&buf[..], b"9abc");
    }
}
