//! UDP session handling.
//!
//! # Data Flow
//! ```text
//! Shared UdpSocket
//!     → listener.rs (demultiplex datagrams by peer)
//!     → conn.rs (UdpConn: one pseudo-connection per peer, idle expiry)
//!     → proxy.rs (UdpProxy: criteria → decide → dial backend → copy)
//! ```
//!
//! # Design Decisions
//! - A pseudo-connection lives until its peer goes idle or the copy fails
//! - One backend socket per pseudo-connection
//! - Buffers hold a full datagram, so none is ever split

pub mod conn;
pub mod listener;
pub mod proxy;

use async_trait::async_trait;
use std::fmt;

pub use conn::{UdpConn, UdpConnWriter};
pub use listener::UdpListener;
pub use proxy::UdpProxy;

/// Largest UDP payload handled in one read.
pub const UDP_BUFFER_SIZE: usize = 65535;

/// One link of a UDP handler chain.
#[async_trait]
pub trait UdpHandler: Send + Sync + fmt::Debug {
    async fn serve_udp(&self, conn: UdpConn);
}
