//! Blocking accept loop.
//!
//! Connections are accepted and served strictly one after another on the
//! calling thread. The listen backlog is 1: while a session runs, at most
//! one further client waits in the kernel queue to be picked up once it ends.

use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};

use crate::session::{Pipeline, Session, SessionReport};

const LISTEN_BACKLOG: i32 = 1;

pub struct DetectionServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl DetectionServer {
    /// Bind the listening socket with address reuse and a backlog of one.
    /// Port 0 picks an ephemeral port.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .context("failed to create listening socket")?;
        socket
            .set_reuse_address(true)
            .context("failed to set SO_REUSEADDR")?;
        socket
            .bind(&addr.into())
            .with_context(|| format!("failed to bind {}", addr))?;
        socket
            .listen(LISTEN_BACKLOG)
            .with_context(|| format!("failed to listen on {}", addr))?;
        let listener: TcpListener = socket.into();
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for one client and stream to it until its session ends.
    pub fn serve_one(&self, pipeline: &mut Pipeline) -> Result<SessionReport> {
        let (stream, peer) = self.accept()?;
        log::info!("connection from {}", peer);
        serve_stream(pipeline, stream, peer)
    }

    /// Serve clients one at a time until a fatal error.
    pub fn serve_forever(&self, pipeline: &mut Pipeline) -> Result<()> {
        loop {
            let report = self.serve_one(pipeline)?;
            log::debug!("session report: {:?}", report);
        }
    }

    fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        loop {
            match self.listener.accept() {
                Ok(accepted) => return Ok(accepted),
                Err(err) if is_transient_accept_error(&err) => {
                    log::warn!("accept failed, retrying: {}", err);
                    continue;
                }
                Err(err) => return Err(err).context("accept failed"),
            }
        }
    }
}

fn serve_stream(
    pipeline: &mut Pipeline,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<SessionReport> {
    if let Err(err) = stream.set_nodelay(true) {
        log::debug!("set_nodelay on {} failed: {}", peer, err);
    }
    let report = Session::new(pipeline, &stream, peer.to_string()).run()?;
    // The peer may already be gone.
    let _ = stream.shutdown(Shutdown::Both);
    log::info!(
        "connection from {} closed ({}, {} frames sent)",
        peer,
        report.end,
        report.frames_sent
    );
    Ok(report)
}

fn is_transient_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
