//! Closed-set enums used across the crate.

use std::fmt;

/// One of the eight methods the worker accepts on a request line.
///
/// Anything else fails parsing with `ParseError::BadMethod` before an
/// environment is ever built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Trace,
    Connect,
}

impl Method {
    pub fn parse(s: &str) -> Option<Method> {
        use self::Method::*;
        Some(match s {
            "GET" => Get,
            "HEAD" => Head,
            "POST" => Post,
            "PUT" => Put,
            "DELETE" => Delete,
            "OPTIONS" => Options,
            "TRACE" => Trace,
            "CONNECT" => Connect,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        use self::Method::*;
        match *self {
            Get => "GET",
            Head => "HEAD",
            Post => "POST",
            Put => "PUT",
            Delete => "DELETE",
            Options => "OPTIONS",
            Trace => "TRACE",
            Connect => "CONNECT",
        }
    }

    /// Methods which may carry a request body.
    pub fn allows_body(&self) -> bool {
        matches!(*self, Method::Post | Method::Put)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exactly the two HTTP versions this server understands.
///
/// HTTP/0.9 and HTTP/2 are out of scope; any other token is a parse
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn parse(s: &str) -> Option<Version> {
        match s {
            "HTTP/1.0" => Some(Version::Http10),
            "HTTP/1.1" => Some(Version::Http11),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }

    /// `Connection: keep-alive` is the implicit default on HTTP/1.1 and
    /// must be explicitly requested on HTTP/1.0.
    pub fn default_keep_alive(&self) -> bool {
        *self == Version::Http11
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
