//! A full-featured, single-threaded, asynchronous HTTP/1.x server
//! library exposing a WSGI-shaped application contract and keep-alive
//! aware WebSocket upgrades, built on `futures` 0.1 and `tokio-core`.
//!
//! The pieces are laid out as one module per major component:
//!
//! - [`buf_stream`] -- the buffered read/write stream adapter (A)
//! - [`request`] -- the request-head parser (B)
//! - [`env`] -- the per-request environment builder (C)
//! - [`body`] -- the bounded request-body reader (part of C)
//! - [`response`] -- the response framer (D)
//! - [`websocket`] -- the draft-75/76 handshake and frame codec (E)
//! - [`worker`] -- the per-connection worker loop (F)
//! - [`drain`] -- the body-iterator drain task for `HEAD` (G)
//! - [`listener`] -- the accept loop (H)
//! - [`upgrade`] -- the plaintext/TLS scheme decision (I)
//!
//! Applications implement [`app::Application`] and are driven by
//! [`listener::serve`].

#[macro_use]
extern crate futures;
extern crate tokio_core;
#[macro_use]
extern crate quick_error;
#[macro_use]
extern crate matches;
#[macro_use]
extern crate log;
extern crate byteorder;
extern crate md5;

pub mod error;
pub mod enums;
pub mod date;
pub mod config;
pub mod buf;
pub mod buf_stream;
pub mod request;
pub mod env;
pub mod body;
pub mod response;
pub mod app;
pub mod websocket;
pub mod drain;
pub mod upgrade;
pub mod worker;
pub mod listener;

pub use app::{Application, AppOutput, BodyIter, BodyReader, ErrorStream, IterBody,
    StartResponse, WebSocketAction};
pub use config::ServerConfig;
pub use enums::{Method, Version};
pub use env::{Environment, Scheme, ServerIdentity};
pub use error::{Error, HeaderError, ParseError, WebSocketError};
pub use listener::serve;
pub use response::StartOutcome;
pub use upgrade::{Acceptor, Mode, NoEncryption};
pub use worker::{ConnContext, Worker};
