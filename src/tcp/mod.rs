//! TCP connection handling.
//!
//! # Data Flow
//! ```text
//! Accepted TcpStream
//!     → conn.rs (TcpConn: stream + endpoints)
//!     → needle.rs (TcpNeedle: criteria → decide → reject closes)
//!     → forward.rs (TcpForwarder: dial backend, copy both ways)
//! ```
//!
//! # Design Decisions
//! - Handlers take the connection by value; the last one owns its close
//! - Close notification is armed at entry and fires when the handler returns

pub mod conn;
pub mod forward;
pub mod needle;

use async_trait::async_trait;
use std::fmt;

pub use conn::{TcpConn, TcpIo};
pub use forward::{DisabledRoute, TcpForwarder};
pub use needle::TcpNeedle;

/// One link of a TCP handler chain.
#[async_trait]
pub trait TcpHandler: Send + Sync + fmt::Debug {
    async fn serve_tcp(&self, conn: TcpConn);
}
