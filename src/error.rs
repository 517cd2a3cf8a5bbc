//! The fault taxonomy of the worker: every way a connection can fail,
//! collapsed into a single type so the worker loop can match on it once.

use std::io;
use std::str::Utf8Error;

quick_error! {
    /// Errors produced while parsing a request head.
    ///
    /// These always lead to a fixed `400`-class response (or, for
    /// `HeadTooLong`, a dropped connection with zero bytes written) and
    /// the connection is never reused afterwards.
    #[derive(Debug)]
    pub enum ParseError {
        /// The boundary blank line was not found within the configured
        /// head size cap.
        HeadTooLong {
            description("request head exceeds the maximum size")
        }
        /// End of stream reached while still reading the head.
        UnexpectedEof {
            description("connection closed while reading request head")
        }
        /// The request line did not split into exactly three tokens.
        MalformedRequestLine {
            description("malformed request line")
        }
        /// Method is not one of the closed set accepted by the server.
        BadMethod {
            description("unsupported request method")
        }
        /// Version token is neither `HTTP/1.0` nor `HTTP/1.1`.
        BadVersion {
            description("unsupported HTTP version")
        }
        /// Request-target failed the sub-URL grammar.
        BadUri {
            description("malformed request-target")
        }
        /// A header line continuation or header line itself was malformed.
        BadHeaderLine {
            description("malformed header line")
        }
        /// `Content-Length` present but not a valid non-negative integer.
        BadContentLength {
            description("malformed Content-Length")
        }
        /// `Content-Length` required (POST/PUT) but absent.
        MissingContentLength {
            description("missing Content-Length for request with body")
        }
        /// `Content-Length` present on a request that must not carry one.
        UnexpectedContentLength {
            description("unexpected Content-Length on bodyless request")
        }
    }
}

quick_error! {
    /// Syntax faults raised by the response framer (component D).
    ///
    /// All of these are programming errors in the application: the
    /// worker converts an uncaught one into a `500` if no bytes have
    /// left the socket yet, so a malformed response is never emitted.
    #[derive(Debug)]
    pub enum HeaderError {
        BadStatus(status: String) {
            description("response status line does not match [2-5]\\d\\d <PHRASE>")
            display("bad response status: {:?}", status)
        }
        BadHeaderName(name: String) {
            description("response header name is not a token")
            display("bad response header name: {:?}", name)
        }
        BadHeaderValue(name: String, value: String) {
            description("response header value is not printable ASCII")
            display("bad response header value for {:?}: {:?}", name, value)
        }
        BadContentLength(value: String) {
            description("Content-Length header is not a valid integer")
            display("bad response Content-Length: {:?}", value)
        }
    }
}

quick_error! {
    /// Faults raised while decoding or encoding WebSocket frames.
    #[derive(Debug)]
    pub enum WebSocketError {
        /// Frame type byte was neither `0x00` nor `0xFF`.
        InvalidFrameType(byte: u8) {
            description("invalid WebSocket frame type")
            display("invalid WebSocket frame type: 0x{:02X}", byte)
        }
        /// Stream ended in the middle of a framed message.
        MessageTruncated {
            description("WebSocket message truncated")
        }
        /// Declared or accumulated length exceeds the configured cap.
        MessageTooLarge {
            description("WebSocket message exceeds the maximum size")
        }
        /// A `0x00`/`0xFF`-framed payload was not valid UTF-8.
        InvalidUtf8(err: Utf8Error) {
            description("WebSocket text message is not valid UTF-8")
            from()
        }
        /// Attempted to write a message containing a `0xFF` byte.
        PayloadContainsTerminator {
            description("WebSocket message payload contains the 0xFF delimiter")
        }
        /// A `Sec-WebSocket-Key{1,2}` value had zero spaces, or the digit
        /// run was not evenly divisible by the space count.
        BadHandshakeKey {
            description("invalid Sec-WebSocket-Key1/Key2 value")
        }
    }
}

quick_error! {
    /// Top-level error type threaded through the worker loop.
    #[derive(Debug)]
    pub enum Error {
        /// I/O error encountered while reading from the socket.
        Read(err: io::Error) {
            description("error reading from connection")
            display("read error: {}", err)
            from()
        }
        /// I/O error encountered while writing to the socket.
        Write(err: io::Error) {
            description("error writing to connection")
            display("write error: {}", err)
        }
        /// Request head failed to parse.
        Parse(err: ParseError) {
            description("error parsing request")
            display("parse error: {}", err)
            from()
        }
        /// Response framing was violated by the application.
        Response(err: HeaderError) {
            description("invalid response framing")
            display("response error: {}", err)
            from()
        }
        /// WebSocket codec fault.
        WebSocket(err: WebSocketError) {
            description("websocket protocol error")
            display("websocket error: {}", err)
            from()
        }
        /// Response body exceeded the declared `Content-Length`.
        BodyTooLong {
            description("response body exceeds declared Content-Length")
        }
        /// The application raised/returned an error of its own.
        Application(msg: String) {
            description("wsgi application error")
            display("application error: {}", msg)
        }
    }
}

/// Marks a write-side failure, distinguished from a read-side one so the
/// worker loop can apply the right logging policy.
pub fn write_err(err: io::Error) -> Error {
    Error::Write(err)
}
