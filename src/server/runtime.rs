//! One configuration generation: needles plus the handler chain of every route.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::schema::{ProxyConfig, RouteConfig};
use crate::needleware::client::Protocol;
use crate::needleware::manager::{Manager, NeedleStatus};
use crate::needleware::needle::Needle;
use crate::needleware::notifier::CloseNotifier;
use crate::tcp::{DisabledRoute, TcpForwarder, TcpHandler, TcpNeedle};
use crate::udp::{UdpHandler, UdpProxy};

/// Why a route's chain could not be built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("unknown needle {0:?}")]
    UnknownNeedle(String),

    #[error("needle {0:?} is disabled")]
    NeedleDisabled(String),
}

/// Admin view of one route in this generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteStatus {
    pub name: String,
    pub protocol: &'static str,
    pub bind_address: String,
    pub backend: String,
    pub needle: Option<String>,
    pub enabled: bool,
    pub error: Option<String>,
}

impl RouteStatus {
    fn new(route: &RouteConfig, protocol: Protocol, error: Option<&RouteError>) -> Self {
        Self {
            name: route.name.clone(),
            protocol: protocol.as_str(),
            bind_address: route.bind_address.clone(),
            backend: route.backend.clone(),
            needle: route.needle.as_ref().map(|n| n.id.clone()),
            enabled: error.is_none(),
            error: error.map(ToString::to_string),
        }
    }
}

/// Immutable once built; replaced wholesale on reload.
#[derive(Debug)]
pub struct Runtime {
    generation: u64,
    manager: Manager,
    tcp: HashMap<String, Arc<dyn TcpHandler>>,
    udp: HashMap<String, Arc<dyn UdpHandler>>,
    routes: Vec<RouteStatus>,
}

impl Runtime {
    /// Must be called within a Tokio runtime.
    pub fn build(config: &ProxyConfig, generation: u64) -> Self {
        let notifier = CloseNotifier::new(
            config.limits.notify_queue_capacity,
            config.limits.notify_concurrency,
        );
        let mut manager = Manager::build(&config.needles, notifier);
        let mut routes = Vec::with_capacity(config.tcp_routes.len() + config.udp_routes.len());

        let mut tcp = HashMap::new();
        for route in &config.tcp_routes {
            let forwarder: Arc<dyn TcpHandler> = Arc::new(TcpForwarder::new(&route.backend));
            let (handler, error) = match bind_needle(&mut manager, route, Protocol::Tcp) {
                Ok(None) => (forwarder, None),
                Ok(Some(needle)) => (
                    Arc::new(TcpNeedle::new(forwarder, needle, &route.name)) as Arc<dyn TcpHandler>,
                    None,
                ),
                Err(e) => (
                    Arc::new(DisabledRoute::new(&route.name, e.to_string())) as Arc<dyn TcpHandler>,
                    Some(e),
                ),
            };
            routes.push(RouteStatus::new(route, Protocol::Tcp, error.as_ref()));
            tcp.insert(route.name.clone(), handler);
        }

        let mut udp = HashMap::new();
        for route in &config.udp_routes {
            let (handler, error) = match bind_needle(&mut manager, route, Protocol::Udp) {
                Ok(needle) => (
                    Arc::new(UdpProxy::new(&route.backend, needle)) as Arc<dyn UdpHandler>,
                    None,
                ),
                Err(e) => (
                    Arc::new(DisabledRoute::new(&route.name, e.to_string())) as Arc<dyn UdpHandler>,
                    Some(e),
                ),
            };
            routes.push(RouteStatus::new(route, Protocol::Udp, error.as_ref()));
            udp.insert(route.name.clone(), handler);
        }

        tracing::info!(
            generation,
            needles = manager.len(),
            tcp_routes = tcp.len(),
            udp_routes = udp.len(),
            "Runtime generation built"
        );

        Self {
            generation,
            manager,
            tcp,
            udp,
            routes,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn routes(&self) -> &[RouteStatus] {
        &self.routes
    }

    pub fn tcp_handler(&self, route: &str) -> Option<Arc<dyn TcpHandler>> {
        self.tcp.get(route).cloned()
    }

    pub fn udp_handler(&self, route: &str) -> Option<Arc<dyn UdpHandler>> {
        self.udp.get(route).cloned()
    }
}

fn bind_needle(
    manager: &mut Manager,
    route: &RouteConfig,
    protocol: Protocol,
) -> Result<Option<Arc<dyn Needle>>, RouteError> {
    let Some(reference) = &route.needle else {
        return Ok(None);
    };

    let Some(needle) = manager.get_needle(&reference.id, reference.metadata.as_ref()) else {
        let error = match manager.infos().get(&reference.id) {
            Some(info) if info.status == NeedleStatus::Disabled => {
                RouteError::NeedleDisabled(reference.id.clone())
            }
            _ => RouteError::UnknownNeedle(reference.id.clone()),
        };
        tracing::error!(route = %route.name, needle = %reference.id, error = %error, "Route disabled");
        return Err(error);
    };

    manager.mark_used_by(&reference.id, protocol, &route.name);
    Ok(Some(needle))
}
