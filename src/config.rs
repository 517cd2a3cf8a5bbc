//! Tunables that the original source hard-codes as module-level
//! constants (`wsgi.py`'s `MAX_WEBSOCKET_MESSAGE_SIZE`, the `32768` head
//! cap, the `65536` coalesce heuristic, the `'pts-syncless-wsgi'`
//! server token). Collected into a config struct so embedders can tune
//! them without forking the crate.

/// Maximum number of bytes in an incoming WebSocket message.
pub const MAX_WEBSOCKET_MESSAGE_SIZE: u64 = 10 << 20;

/// Default cap on a request head.
pub const DEFAULT_MAX_HEAD_BYTES: usize = 32_768;

/// Default server identity token.
pub const DEFAULT_SERVER_SOFTWARE: &'static str = "pts-syncless-wsgi";

/// Default coalesce-then-autoflush threshold. Has no protocol
/// significance; embedders may choose a different threshold.
pub const DEFAULT_COALESCE_THRESHOLD: usize = 65_536;

/// Per-listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Cap on the size of a request head.
    pub max_head_bytes: usize,
    /// Server identity string sent in the `Server:` header and used to
    /// populate `SERVER_SOFTWARE`.
    pub server_software: String,
    /// Body size under which the first produced chunk is coalesced with
    /// the header write before switching to autoflush.
    pub write_coalesce_threshold: usize,
    /// Cap on an individual WebSocket message.
    pub max_websocket_message_size: u64,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            max_head_bytes: DEFAULT_MAX_HEAD_BYTES,
            server_software: DEFAULT_SERVER_SOFTWARE.to_string(),
            write_coalesce_threshold: DEFAULT_COALESCE_THRESHOLD,
            max_websocket_message_size: MAX_WEBSOCKET_MESSAGE_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn new() -> ServerConfig {
        ServerConfig::default()
    }

    pub fn max_head_bytes(mut self, n: usize) -> Self {
        self.max_head_bytes = n;
        self
    }

    pub fn server_software<S: Into<String>>(mut self, s: S) -> Self {
        self.server_software = s.into();
        self
    }

    pub fn write_coalesce_threshold(mut self, n: usize) -> Self {
        self.write_coalesce_threshold = n;
        self
    }

    pub fn max_websocket_message_size(mut self, n: u64) -> Self {
        self.max_websocket_message_size = n;
        self
    }
}
