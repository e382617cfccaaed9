//! UDP pseudo-connection: one client peer on a shared listening socket.

use dashmap::DashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, OwnedSemaphorePermit};

/// Entry in the listener's peer table.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) id: u64,
    pub(crate) tx: mpsc::Sender<Vec<u8>>,
}

pub(crate) type SessionTable = Arc<DashMap<SocketAddr, Session>>;

/// Removes the session from the table when its connection goes away,
/// returning its slot to the listener's session limit.
pub(crate) struct Registration {
    sessions: SessionTable,
    peer: SocketAddr,
    id: u64,
    _permit: OwnedSemaphorePermit,
}

impl Registration {
    pub(crate) fn new(sessions: SessionTable, peer: SocketAddr, id: u64, permit: OwnedSemaphorePermit) -> Self {
        Self {
            sessions,
            peer,
            id,
            _permit: permit,
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let id = self.id;
        self.sessions.remove_if(&self.peer, |_, session| session.id == id);
    }
}

/// Datagrams from one peer, plus a way to answer it.
///
/// Reading reports end of stream once the peer stays silent for the idle
/// timeout.
pub struct UdpConn {
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    rx: mpsc::Receiver<Vec<u8>>,
    socket: Arc<UdpSocket>,
    idle_timeout: Duration,
    _registration: Registration,
}

impl UdpConn {
    pub(crate) fn new(
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
        rx: mpsc::Receiver<Vec<u8>>,
        socket: Arc<UdpSocket>,
        idle_timeout: Duration,
        registration: Registration,
    ) -> Self {
        Self {
            peer_addr,
            local_addr,
            rx,
            socket,
            idle_timeout,
            _registration: registration,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next datagram, truncated to `buf`. `None` on idle expiry or close.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Option<usize> {
        let datagram = tokio::time::timeout(self.idle_timeout, self.rx.recv())
            .await
            .ok()
            .flatten()?;
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Some(n)
    }

    pub fn writer(&self) -> UdpConnWriter {
        UdpConnWriter {
            socket: self.socket.clone(),
            peer_addr: self.peer_addr,
        }
    }
}

impl fmt::Debug for UdpConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpConn")
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.local_addr)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

/// Send half of a `UdpConn`.
#[derive(Debug, Clone)]
pub struct UdpConnWriter {
    socket: Arc<UdpSocket>,
    peer_addr: SocketAddr,
}

impl UdpConnWriter {
    pub async fn send(&self, datagram: &[u8]) -> io::Result<usize> {
        self.socket.send_to(datagram, self.peer_addr).await
    }
}
