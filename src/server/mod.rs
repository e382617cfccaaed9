//! Entrypoint accept loops and generation swapping.
//!
//! # Data Flow
//! ```text
//! Server::bind(config)
//!     → bind every TCP/UDP route listener (+ admin) once
//!     → Runtime::build(config, 0) stored in ArcSwap
//!
//! Per accepted connection:
//!     → runtime.load_full() (lock-free, one generation per connection)
//!     → route handler chain (TcpNeedle → TcpForwarder | UdpProxy)
//!
//! Config update:
//!     → Runtime::build(config, n + 1)
//!     → ArcSwap::store (old generation drops with its last connection)
//! ```
//!
//! # Design Decisions
//! - Listener sockets survive reloads; address changes need a restart
//! - In-flight connections keep the generation they started with

pub mod runtime;

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::schema::{ProxyConfig, RouteConfig};
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};
use crate::tcp::TcpConn;
use crate::udp::UdpListener;

pub use runtime::{RouteError, RouteStatus, Runtime};

/// How long shutdown waits for open TCP connections.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("route {route}: {source}")]
    Listener {
        route: String,
        #[source]
        source: ListenerError,
    },

    #[error("admin listener: {0}")]
    Admin(#[source] std::io::Error),
}

struct TcpEntry {
    route: String,
    listener: Listener,
    tracker: ConnectionTracker,
}

struct UdpEntry {
    route: String,
    listener: UdpListener,
}

/// Bound listeners plus the current runtime generation.
pub struct Server {
    config: ProxyConfig,
    runtime: Arc<ArcSwap<Runtime>>,
    tcp: Vec<TcpEntry>,
    udp: Vec<UdpEntry>,
    admin: Option<TcpListener>,
}

impl Server {
    /// Bind every listener and build generation 0.
    pub async fn bind(config: ProxyConfig) -> Result<Self, ServerError> {
        let mut tcp = Vec::with_capacity(config.tcp_routes.len());
        for route in &config.tcp_routes {
            let listener = Listener::bind(&route.bind_address, config.limits.max_connections)
                .await
                .map_err(|source| ServerError::Listener {
                    route: route.name.clone(),
                    source,
                })?;
            log_bound(route, "tcp", listener.local_addr().ok());
            tcp.push(TcpEntry {
                route: route.name.clone(),
                listener,
                tracker: ConnectionTracker::new(&route.name),
            });
        }

        let idle = Duration::from_secs(config.limits.udp_session_idle_secs);
        let mut udp = Vec::with_capacity(config.udp_routes.len());
        for route in &config.udp_routes {
            let listener = UdpListener::bind(&route.bind_address, idle)
                .await
                .map_err(|source| ServerError::Listener {
                    route: route.name.clone(),
                    source,
                })?
                .with_max_sessions(config.limits.max_connections);
            log_bound(route, "udp", Some(listener.local_addr()));
            udp.push(UdpEntry {
                route: route.name.clone(),
                listener,
            });
        }

        let admin = if config.admin.enabled {
            let listener = TcpListener::bind(&config.admin.bind_address)
                .await
                .map_err(ServerError::Admin)?;
            tracing::info!(address = ?listener.local_addr().ok(), "Admin API bound");
            Some(listener)
        } else {
            None
        };

        let runtime = Arc::new(ArcSwap::from_pointee(Runtime::build(&config, 0)));
        Ok(Self {
            config,
            runtime,
            tcp,
            udp,
            admin,
        })
    }

    pub fn tcp_addr(&self, route: &str) -> Option<SocketAddr> {
        self.tcp
            .iter()
            .find(|e| e.route == route)
            .and_then(|e| e.listener.local_addr().ok())
    }

    pub fn udp_addr(&self, route: &str) -> Option<SocketAddr> {
        self.udp
            .iter()
            .find(|e| e.route == route)
            .map(|e| e.listener.local_addr())
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn runtime(&self) -> Arc<ArcSwap<Runtime>> {
        self.runtime.clone()
    }

    /// Serve until `shutdown` fires, applying snapshots from `updates`.
    pub async fn run(
        self,
        mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let mut tasks = JoinSet::new();
        let mut trackers = Vec::with_capacity(self.tcp.len());

        for entry in self.tcp {
            trackers.push(entry.tracker.clone());
            tasks.spawn(tcp_accept_loop(entry, self.runtime.clone(), shutdown.resubscribe()));
        }
        for entry in self.udp {
            tasks.spawn(udp_accept_loop(entry, self.runtime.clone(), shutdown.resubscribe()));
        }
        if let Some(listener) = self.admin {
            let router = setup_admin_router(AdminState {
                api_key: Arc::from(self.config.admin.api_key.as_str()),
                runtime: self.runtime.clone(),
            });
            let mut admin_shutdown = shutdown.resubscribe();
            tasks.spawn(async move {
                let served = axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = admin_shutdown.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin API stopped");
                }
            });
        }

        let mut generation = self.runtime.load().generation();
        let mut updates_open = true;
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                update = updates.recv(), if updates_open => match update {
                    Some(config) => {
                        generation += 1;
                        warn_on_rebind(&self.config, &config);
                        let next = Runtime::build(&config, generation);
                        self.runtime.store(Arc::new(next));
                        tracing::info!(generation, "Configuration reloaded");
                    }
                    None => updates_open = false,
                },
            }
        }

        tracing::info!("Shutdown signal received, stopping listeners");
        while tasks.join_next().await.is_some() {}

        for tracker in trackers {
            if !tracker.wait_for_drain(DRAIN_TIMEOUT).await {
                tracing::warn!(active = tracker.active_count(), "Connections still open after drain timeout");
            }
        }
        Ok(())
    }
}

fn log_bound(route: &RouteConfig, protocol: &str, addr: Option<SocketAddr>) {
    tracing::info!(
        route = %route.name,
        protocol,
        address = ?addr,
        backend = %route.backend,
        needle = ?route.needle.as_ref().map(|n| n.id.as_str()),
        "Listener bound"
    );
}

/// Listeners are fixed at startup; report routes a reload cannot honour.
fn warn_on_rebind(current: &ProxyConfig, next: &ProxyConfig) {
    let bound: HashMap<&str, &str> = current
        .tcp_routes
        .iter()
        .chain(current.udp_routes.iter())
        .map(|r| (r.name.as_str(), r.bind_address.as_str()))
        .collect();

    for route in next.tcp_routes.iter().chain(next.udp_routes.iter()) {
        match bound.get(route.name.as_str()) {
            None => tracing::warn!(route = %route.name, "New route needs a restart to be served"),
            Some(addr) if *addr != route.bind_address => tracing::warn!(
                route = %route.name,
                current = %addr,
                requested = %route.bind_address,
                "bind_address change needs a restart, keeping current socket"
            ),
            Some(_) => {}
        }
    }
}

async fn tcp_accept_loop(
    entry: TcpEntry,
    runtime: Arc<ArcSwap<Runtime>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let TcpEntry {
        route,
        listener,
        tracker,
    } = entry;

    loop {
        let accepted = tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer_addr, permit) = match accepted {
            Ok(accepted) => accepted,
            Err(ListenerError::Closed) => break,
            Err(e) => {
                tracing::warn!(route = %route, error = %e, "Accept failed");
                continue;
            }
        };

        let Some(handler) = runtime.load_full().tcp_handler(&route) else {
            tracing::debug!(route = %route, peer_addr = %peer_addr, "Route no longer configured, dropping connection");
            continue;
        };
        let guard = tracker.track();
        tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            match TcpConn::new(stream) {
                Ok(conn) => handler.serve_tcp(conn).await,
                Err(e) => tracing::debug!(peer_addr = %peer_addr, error = %e, "Connection lost before handling"),
            }
        });
    }
    tracing::debug!(route = %route, "TCP accept loop stopped");
}

async fn udp_accept_loop(
    entry: UdpEntry,
    runtime: Arc<ArcSwap<Runtime>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let UdpEntry { route, mut listener } = entry;

    loop {
        let accepted = tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => accepted,
        };
        let conn = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(route = %route, error = %e, "UDP receive failed");
                continue;
            }
        };

        let Some(handler) = runtime.load_full().udp_handler(&route) else {
            tracing::debug!(route = %route, peer_addr = %conn.peer_addr(), "Route no longer configured, dropping session");
            continue;
        };
        tokio::spawn(async move { handler.serve_udp(conn).await });
    }
    tracing::debug!(route = %route, "UDP accept loop stopped");
}
