//! needleware-proxy
//!
//! TCP/UDP reverse proxy with external admission control.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                  NEEDLEWARE PROXY                     │
//!                      │                                                       │
//!   Client conn        │  ┌──────────┐   ┌────────────┐   ┌──────────────┐    │
//!   ───────────────────┼─▶│ net/udp  │──▶│ tcp::Needle│──▶│ TcpForwarder │────┼──▶ Backend
//!                      │  │ listener │   │ UdpProxy   │   │ (copy both   │    │
//!                      │  └──────────┘   └─────┬──────┘   │  ways)       │    │
//!                      │                       │          └──────────────┘    │
//!                      │                       ▼                              │
//!                      │               ┌──────────────┐    gRPC               │
//!                      │               │  needleware  │───────────────────────┼──▶ Decision
//!                      │               │ Needle +     │  open / close         │    service
//!                      │               │ CloseNotifier│                       │
//!                      │               └──────────────┘                       │
//!                      │                                                       │
//!                      │  config (TOML + watcher) → server::Runtime (ArcSwap)  │
//!                      │  observability (tracing, Prometheus) · admin (axum)   │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use needleware_proxy::config::watcher::ConfigWatcher;
use needleware_proxy::config::{load_config, ProxyConfig};
use needleware_proxy::lifecycle::{shutdown_signal, Shutdown};
use needleware_proxy::observability::{logging::init_logging, metrics::init_metrics};
use needleware_proxy::server::Server;

#[derive(Parser)]
#[command(name = "needleware-proxy")]
#[command(about = "TCP/UDP reverse proxy with external admission control", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; built-in defaults when absent.
    #[arg(short, long, env = "NEEDLEWARE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "needleware-proxy starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    tracing::info!(
        needles = config.needles.len(),
        tcp_routes = config.tcp_routes.len(),
        udp_routes = config.udp_routes.len(),
        "Configuration loaded"
    );

    // dropping the watcher handle stops reloads
    let (_watcher, updates) = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        None => (None, tokio::sync::mpsc::unbounded_channel().1),
    };

    let server = Server::bind(config).await?;

    let shutdown = Shutdown::new();
    let stopped = shutdown.subscribe();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.trigger();
    });

    server.run(updates, stopped).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
