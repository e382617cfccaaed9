//! Shared UDP socket demultiplexed into per-peer pseudo-connections.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;

use crate::net::listener::ListenerError;
use crate::udp::conn::{Registration, Session, SessionTable, UdpConn};
use crate::udp::UDP_BUFFER_SIZE;

/// Datagrams queued per session before new ones are dropped.
const SESSION_QUEUE_CAPACITY: usize = 64;

/// Concurrent sessions unless `with_max_sessions` says otherwise.
const DEFAULT_MAX_SESSIONS: usize = 10_000;

#[derive(Debug)]
pub struct UdpListener {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    sessions: SessionTable,
    idle_timeout: Duration,
    session_limit: Arc<Semaphore>,
    max_sessions: usize,
    next_id: u64,
    buf: Vec<u8>,
}

impl UdpListener {
    pub async fn bind(bind_address: &str, idle_timeout: Duration) -> Result<Self, ListenerError> {
        let addr: SocketAddr = bind_address
            .parse()
            .map_err(|source| ListenerError::InvalidAddress {
                addr: bind_address.to_string(),
                source,
            })?;
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| ListenerError::Bind { addr, source })?;

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            sessions: Arc::new(DashMap::new()),
            idle_timeout,
            session_limit: Arc::new(Semaphore::new(DEFAULT_MAX_SESSIONS)),
            max_sessions: DEFAULT_MAX_SESSIONS,
            next_id: 0,
            buf: vec![0u8; UDP_BUFFER_SIZE],
        })
    }

    /// Cap concurrent sessions; datagrams from new peers are dropped at the cap.
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        let max_sessions = max_sessions.max(1);
        self.session_limit = Arc::new(Semaphore::new(max_sessions));
        self.max_sessions = max_sessions;
        self
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Wait for a datagram from a peer without a live session.
    ///
    /// Datagrams from known peers are routed to their session meanwhile.
    pub async fn accept(&mut self) -> Result<UdpConn, ListenerError> {
        loop {
            let (n, peer) = self
                .socket
                .recv_from(&mut self.buf)
                .await
                .map_err(ListenerError::Accept)?;
            let datagram = self.buf[..n].to_vec();

            if let Some(datagram) = self.route(peer, datagram) {
                if let Some(conn) = self.open(peer, datagram) {
                    return Ok(conn);
                }
            }
        }
    }

    /// Hand the datagram to an existing session; give it back if there is none.
    fn route(&self, peer: SocketAddr, datagram: Vec<u8>) -> Option<Vec<u8>> {
        let sent = match self.sessions.get(&peer) {
            None => return Some(datagram),
            Some(session) => session.tx.try_send(datagram),
        };
        match sent {
            Ok(()) => None,
            Err(TrySendError::Full(_)) => {
                tracing::trace!(peer_addr = %peer, "UDP session queue full, dropping datagram");
                None
            }
            Err(TrySendError::Closed(datagram)) => {
                self.sessions.remove_if(&peer, |_, session| session.tx.is_closed());
                Some(datagram)
            }
        }
    }

    /// `None` when the session limit is reached; the datagram is dropped.
    fn open(&mut self, peer: SocketAddr, first: Vec<u8>) -> Option<UdpConn> {
        let Ok(permit) = self.session_limit.clone().try_acquire_owned() else {
            tracing::debug!(
                peer_addr = %peer,
                max_sessions = self.max_sessions,
                "UDP session limit reached, dropping datagram"
            );
            return None;
        };
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
        let id = self.next_id;
        self.next_id += 1;
        // fresh channel, never full
        let _ = tx.try_send(first);
        self.sessions.insert(peer, Session { id, tx });
        tracing::trace!(peer_addr = %peer, session = id, "UDP session opened");

        Some(UdpConn::new(
            peer,
            self.local_addr,
            rx,
            self.socket.clone(),
            self.idle_timeout,
            Registration::new(self.sessions.clone(), peer, id, permit),
        ))
    }
}
