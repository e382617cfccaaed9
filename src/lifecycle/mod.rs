//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → shutdown_signal() resolves
//!
//! Shutdown (shutdown.rs):
//!     trigger() → accept loops stop → open connections drain → exit
//! ```
//!
//! # Design Decisions
//! - Config reload is file-driven (config::watcher), not signal-driven
//! - Shutdown has a drain deadline; stragglers are abandoned

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
