//! Component C: the environment builder.
//!
//! Turns a parsed `RequestHead` plus per-connection metadata into the
//! WSGI-shaped `Environment` map the application is called with. Also
//! implements the request-body-presence rules: `Content-Length`
//! validation, the POST/PUT-requires-body rule, the
//! no-body-methods-must-not-declare-length rule, and the draft-76
//! WebSocket 8-byte-body carve-out.

use std::collections::HashMap;

use enums::{Method, Version};
use error::{Error, ParseError};
use request::RequestHead;

/// Scheme the connection was accepted as, set by the upgrade decision
/// (component I) before the environment is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match *self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
    pub fn https_flag(&self) -> &'static str {
        match *self {
            Scheme::Http => "off",
            Scheme::Https => "on",
        }
    }
}

/// Server-wide identity, computed once at bind time
/// (`PopulateDefaultWsgiEnv` in the original source) and cloned into
/// every connection's environment.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub addr: String,
    pub name: String,
    pub port: u16,
    pub software: String,
}

/// The per-request environment handed to the application.
///
/// Modeled as a flat string map mirroring the WSGI `env` dict, plus a
/// few fields (body length, scheme, websocket keys) broken out as
/// typed accessors since the worker and websocket modules need them
/// directly rather than through string lookups.
#[derive(Debug, Clone)]
pub struct Environment {
    vars: HashMap<String, String>,
    pub content_length: Option<u64>,
    pub method: Method,
    pub version: Version,
    pub scheme: Scheme,
    pub websocket_key1: Option<String>,
    pub websocket_key2: Option<String>,
}

impl Environment {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    pub fn iter(&self) -> ::std::collections::hash_map::Iter<String, String> {
        self.vars.iter()
    }

    pub fn path(&self) -> &str {
        self.vars.get("PATH_INFO").map(|s| s.as_str()).unwrap_or("")
    }

    pub fn query(&self) -> &str {
        self.vars.get("QUERY_STRING").map(|s| s.as_str()).unwrap_or("")
    }

    pub fn host(&self) -> Option<&str> {
        self.get("HTTP_HOST")
    }

    pub fn origin(&self) -> Option<&str> {
        self.get("HTTP_ORIGIN")
    }

    fn set(&mut self, key: &str, value: String) {
        self.vars.insert(key.to_string(), value);
    }
}

/// Converts a header name into its `HTTP_*` environment key: upper-cased,
/// dashes replaced with underscores.
fn header_env_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len() + 5);
    key.push_str("HTTP_");
    for c in name.chars() {
        if c == '-' {
            key.push('_');
        } else {
            key.push(c.to_ascii_uppercase());
        }
    }
    key
}

/// Builds the environment for one request.
///
/// `scheme` and `https_on` come from the upgrade decision (component I);
/// `identity`/`remote_addr`/`remote_port` are per-connection constants.
pub fn build(
    head: &RequestHead,
    identity: &ServerIdentity,
    remote_addr: &str,
    remote_port: u16,
    scheme: Scheme,
) -> Result<Environment, Error> {
    let mut vars = HashMap::new();
    vars.insert("REQUEST_METHOD".to_string(), head.method.as_str().to_string());
    vars.insert("SERVER_PROTOCOL".to_string(), head.version.as_str().to_string());
    vars.insert("SCRIPT_NAME".to_string(), String::new());
    vars.insert("SERVER_ADDR".to_string(), identity.addr.clone());
    vars.insert("SERVER_NAME".to_string(), identity.name.clone());
    vars.insert("SERVER_PORT".to_string(), identity.port.to_string());
    vars.insert("SERVER_SOFTWARE".to_string(), identity.software.clone());
    vars.insert("REMOTE_ADDR".to_string(), remote_addr.to_string());
    vars.insert("REMOTE_HOST".to_string(), remote_addr.to_string());
    vars.insert("REMOTE_PORT".to_string(), remote_port.to_string());
    vars.insert("wsgi.url_scheme".to_string(), scheme.as_str().to_string());
    vars.insert("HTTPS".to_string(), scheme.https_flag().to_string());

    match head.target.find('?') {
        Some(i) => {
            vars.insert("PATH_INFO".to_string(), head.target[..i].to_string());
            vars.insert("QUERY_STRING".to_string(), head.target[i + 1..].to_string());
        }
        None => {
            vars.insert("PATH_INFO".to_string(), head.target.clone());
            vars.insert("QUERY_STRING".to_string(), String::new());
        }
    }

    let mut content_length: Option<u64> = None;
    let mut websocket_key1 = None;
    let mut websocket_key2 = None;

    for &(ref name, ref value) in &head.headers {
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "CONTENT-LENGTH" => {
                let n: u64 = value.trim().parse()
                    .map_err(|_| Error::Parse(ParseError::BadContentLength))?;
                content_length = Some(n);
                vars.insert("CONTENT_LENGTH".to_string(), value.clone());
            }
            "CONTENT-TYPE" => {
                vars.insert("CONTENT_TYPE".to_string(), value.clone());
            }
            "SEC-WEBSOCKET-KEY1" => {
                websocket_key1 = Some(value.clone());
                vars.insert(header_env_key(name), value.clone());
            }
            "SEC-WEBSOCKET-KEY2" => {
                websocket_key2 = Some(value.clone());
                vars.insert(header_env_key(name), value.clone());
            }
            _ if upper.starts_with("PROXY-") => {}
            _ => {
                vars.insert(header_env_key(name), value.clone());
            }
        }
    }

    // POST/PUT require Content-Length; other methods must not declare
    // a non-zero one.
    match content_length {
        None => {
            if head.method.allows_body() {
                return Err(Error::Parse(ParseError::MissingContentLength));
            }
            if websocket_key1.is_some() && websocket_key2.is_some() &&
                head.method == Method::Get
            {
                content_length = Some(8);
            }
        }
        Some(n) => {
            if !head.method.allows_body() && n != 0 {
                return Err(Error::Parse(ParseError::UnexpectedContentLength));
            }
            if !head.method.allows_body() && n == 0 {
                content_length = None;
                vars.remove("CONTENT_LENGTH");
            }
        }
    }

    Ok(Environment {
        vars: vars,
        content_length: content_length,
        method: head.method,
        version: head.version,
        scheme: scheme,
        websocket_key1: websocket_key1,
        websocket_key2: websocket_key2,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use enums::{Method, Version};
    use request::RequestHead;

    fn identity() -> ServerIdentity {
        ServerIdentity {
            addr: "127.0.0.1".into(),
            name: "127.0.0.1".into(),
            port: 8080,
            software: "pts-syncless-wsgi".into(),
        }
    }

    #[test]
    fn splits_path_and_query() {
        let head = RequestHead {
            method: Method::Get,
            target: "/a/b?x=1".into(),
            version: Version::Http11,
            headers: vec![("Host".into(), "x".into())],
        };
        let env = build(&head, &identity(), "1.2.3.4", 9999, Scheme::Http).unwrap();
        assert_eq!(env.path(), "/a/b");
        assert_eq!(env.query(), "x=1");
        assert_eq!(env.get("HTTPS"), Some("off"));
    }

    #[test]
    fn post_without_content_length_is_rejected() {
        let head = RequestHead {
            method: Method::Post,
            target: "/".into(),
            version: Version::Http11,
            headers: vec![],
        };
        match build(&head, &identity(), "1.2.3.4", 1, Scheme::Http) {
            Err(Error::Parse(ParseError::MissingContentLength)) => {}
            other => panic!("expected MissingContentLength, got {:?}", other),
        }
    }

    #[test]
    fn websocket_key_pair_implies_eight_byte_body() {
        let head = RequestHead {
            method: Method::Get,
            target: "/ws".into(),
            version: Version::Http11,
            headers: vec![
                ("Sec-WebSocket-Key1".into(), "1  2".into()),
                ("Sec-WebSocket-Key2".into(), "3  4".into()),
            ],
        };
        let env = build(&head, &identity(), "1.2.3.4", 1, Scheme::Http).unwrap();
        assert_eq!(env.content_length, Some(8));
    }
}
