//! TCP/UDP reverse proxy with external admission control ("needleware").

pub mod admin;
pub mod config;
pub mod lifecycle;
pub mod needleware;
pub mod net;
pub mod observability;
pub mod server;
pub mod tcp;
pub mod udp;

pub use config::schema::ProxyConfig;
pub use lifecycle::Shutdown;
pub use server::Server;
