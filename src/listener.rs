//! Component H: the listener.
//!
//! Binds a `TcpListener`, computes the server identity once from the
//! bound address, and spawns an `AcceptTask` per accepted connection.
//! `AcceptTask` is a small explicit state machine in the same style as
//! `Worker`/`DrainTask`: it first drives the scheme decision (component
//! I) on the connection's `BufStream`, then hands the same stream --
//! peeked bytes and all -- to a freshly built `Worker`.
//!
//! TLS is a stated non-goal, so the `Acceptor` seam here is deliberately
//! constrained to acceptors that return the same stream type they were
//! given (`Acceptor<TcpStream, Stream = TcpStream>`): this fits the
//! shipped `NoEncryption` acceptor exactly. A real encrypting acceptor
//! would need its own stream type and its own handling of the prefix
//! bytes peeked during the scheme decision; wiring that up is left to
//! the embedder.
//!
//! A listening-socket error ends the whole accept loop; per-connection
//! errors are confined to that connection's own `AcceptTask`.

use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use futures::{Async, Future, Poll, Stream};
use futures::future;
use tokio_core::net::{TcpListener, TcpStream};
use tokio_core::reactor::Handle;

use app::Application;
use buf_stream::BufStream;
use config::ServerConfig;
use env::{Scheme, ServerIdentity};
use upgrade::{self, Acceptor, Mode};
use worker::{ConnContext, Worker};

/// Starts accepting connections on `addr` and spawns a task for each
/// one on `handle`. Resolves once the listening socket itself errors.
pub fn serve<A, Acc>(
    addr: &SocketAddr,
    app: Rc<A>,
    config: ServerConfig,
    mode: Mode,
    acceptor: Rc<Acc>,
    handle: Handle,
) -> Box<Future<Item = (), Error = io::Error>>
where
    A: Application + 'static,
    Acc: Acceptor<TcpStream, Stream = TcpStream> + 'static,
{
    let listener = match TcpListener::bind(addr, &handle) {
        Ok(l) => l,
        Err(e) => return Box::new(future::err(e)),
    };
    let bound_addr = listener.local_addr().unwrap_or(*addr);
    let identity = ServerIdentity {
        addr: bound_addr.ip().to_string(),
        name: bound_addr.ip().to_string(),
        port: bound_addr.port(),
        software: config.server_software.clone(),
    };
    let ctx = Rc::new(ConnContext {
        identity: identity,
        config: config,
        app: app,
        handle: handle.clone(),
    });

    let spawn_handle = handle.clone();
    let future = listener.incoming().for_each(move |(socket, peer)| {
        let task = AcceptTask {
            state: Some(AcceptState::Deciding(BufStream::new(socket), mode)),
            ctx: ctx.clone(),
            acceptor: acceptor.clone(),
            remote_addr: peer.ip().to_string(),
            remote_port: peer.port(),
        };
        spawn_handle.spawn(task);
        Ok(())
    });
    Box::new(future)
}

enum AcceptState<A: Application, Acc: Acceptor<TcpStream>> {
    Deciding(BufStream<TcpStream>, Mode),
    Running(Worker<Acc::Stream, A>),
}

struct AcceptTask<A: Application, Acc: Acceptor<TcpStream>> {
    state: Option<AcceptState<A, Acc>>,
    ctx: Rc<ConnContext<A>>,
    acceptor: Rc<Acc>,
    remote_addr: String,
    remote_port: u16,
}

impl<A, Acc> Future for AcceptTask<A, Acc>
where
    A: Application,
    Acc: Acceptor<TcpStream, Stream = TcpStream>,
{
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        loop {
            match self.state.take().expect("AcceptTask polled after completion") {
                AcceptState::Deciding(mut stream, mode) => {
                    match upgrade::decide_scheme(&mut stream, mode) {
                        Ok(Async::Ready(scheme)) => {
                            let (socket, prefix) = stream.into_parts();
                            let wrapped = match scheme {
                                Scheme::Https => self.acceptor.accept(socket),
                                Scheme::Http => Some(socket),
                            };
                            match wrapped {
                                Some(sock) => {
                                    let stream = BufStream::with_primed(sock, prefix);
                                    let worker = Worker::new(stream, self.ctx.clone(),
                                        self.remote_addr.clone(), self.remote_port, scheme);
                                    self.state = Some(AcceptState::Running(worker));
                                }
                                None => return Ok(Async::Ready(())),
                            }
                        }
                        Ok(Async::NotReady) => {
                            self.state = Some(AcceptState::Deciding(stream, mode));
                            return Ok(Async::NotReady);
                        }
                        Err(e) => {
                            debug!("connection from {} dropped before a request: {:?}",
                                self.remote_addr, e);
                            return Ok(Async::Ready(()));
                        }
                    }
                }
                AcceptState::Running(mut worker) => {
                    match worker.poll() {
                        Ok(Async::Ready(())) => return Ok(Async::Ready(())),
                        Ok(Async::NotReady) => {
                            self.state = Some(AcceptState::Running(worker));
                            return Ok(Async::NotReady);
                        }
                        Err(()) => return Ok(Async::Ready(())),
                    }
                }
            }
        }
    }
}
