//! The request body reader handed to the application as `wsgi.input`:
//! a bounded reader yielding exactly `Content-Length` bytes, or an
//! empty stream when there is no body.
//!
//! Also implements the "discard before next request" invariant:
//! `discard_to_limit` drains whatever the application left unread so
//! the next pipelined request can be parsed cleanly.

use futures::{Async, Poll};
use tokio_core::io::Io;

use buf_stream::BufStream;
use error::Error;

pub struct RequestBody {
    remaining: u64,
}

impl RequestBody {
    pub fn new(content_length: Option<u64>) -> RequestBody {
        RequestBody { remaining: content_length.unwrap_or(0) }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Reads up to `max` bytes of body, or fewer near the end.
    pub fn read<S: Io>(&mut self, stream: &mut BufStream<S>, max: usize)
        -> Poll<Vec<u8>, Error>
    {
        if self.remaining == 0 {
            return Ok(Async::Ready(Vec::new()));
        }
        let want = (max as u64).min(self.remaining) as usize;
        let data = try_ready!(stream.read_exact(want));
        self.remaining -= data.len() as u64;
        Ok(Async::Ready(data))
    }

    /// Drains whatever is left, discarding it, so the connection is
    /// ready for the next pipelined request; matches
    /// `input.discard_to_read_limit()` in the original source.
    pub fn discard_to_limit<S: Io>(&mut self, stream: &mut BufStream<S>)
        -> Poll<(), Error>
    {
        while self.remaining > 0 {
            let chunk = (self.remaining.min(8192)) as usize;
            let data = try_ready!(stream.read_exact(chunk));
            self.remaining -= data.len() as u64;
        }
        Ok(Async::Ready(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_reads_nothing() {
        let mut body = RequestBody::new(None);
        assert!(body.is_exhausted());
        assert_eq!(body.remaining(), 0);
    }

    #[test]
    fn tracks_remaining() {
        let mut body = RequestBody::new(Some(10));
        assert_eq!(body.remaining(), 10);
        assert!(!body.is_exhausted());
    }
}
