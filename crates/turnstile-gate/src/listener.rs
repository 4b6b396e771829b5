//! TCP listener integration.

use crate::gate::Admission;
use crate::stream::GatedStream;
use crate::AdmissionGate;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::trace;

/// A TCP listener that consults an [`AdmissionGate`] for every accepted socket.
///
/// Sockets over the ceiling are closed before [`accept`](Self::accept)
/// returns, so the caller only ever sees admitted connections.
#[derive(Debug)]
pub struct GatedListener {
    listener: TcpListener,
    gate: AdmissionGate,
}

impl GatedListener {
    pub async fn bind<A: ToSocketAddrs>(addr: A, gate: AdmissionGate) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, gate))
    }

    pub fn from_listener(listener: TcpListener, gate: AdmissionGate) -> Self {
        Self { listener, gate }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Wait for the next admitted connection.
    ///
    /// Cancel safe: if the future is dropped before completing, no
    /// connection has been admitted and no slot is held.
    pub async fn accept(&self) -> io::Result<(GatedStream<TcpStream>, SocketAddr)> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            match self.gate.admit(socket) {
                Admission::Admitted(stream) => return Ok((stream, peer)),
                Admission::Rejected => {
                    trace!(listener = %self.gate.label(), %peer, "closed rejected socket");
                }
            }
        }
    }
}
