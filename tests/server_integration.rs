//! Full server: listeners, route chains, reload and admin API.

mod common;

use axum::body::Body;
use axum::http::{header::AUTHORIZATION, Request, StatusCode};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use needleware_proxy::admin::{setup_admin_router, AdminState};
use needleware_proxy::config::ProxyConfig;
use needleware_proxy::server::{Server, ServerError};
use needleware_proxy::Shutdown;

struct Running {
    tcp: Vec<(String, SocketAddr)>,
    udp: Vec<(String, SocketAddr)>,
    admin: Option<SocketAddr>,
    state: AdminState,
    updates: mpsc::UnboundedSender<ProxyConfig>,
    shutdown: Shutdown,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl Running {
    fn tcp(&self, route: &str) -> SocketAddr {
        self.tcp.iter().find(|(n, _)| n == route).unwrap().1
    }

    fn udp(&self, route: &str) -> SocketAddr {
        self.udp.iter().find(|(n, _)| n == route).unwrap().1
    }

    async fn wait_for_generation(&self, generation: u64) {
        for _ in 0..200 {
            if self.state.runtime.load().generation() == generation {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("generation {} never became current", generation);
    }

    async fn stop(self) {
        self.shutdown.trigger();
        let result = tokio::time::timeout(Duration::from_secs(15), self.handle)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}

async fn start(config: ProxyConfig) -> Running {
    let tcp_names: Vec<String> = config.tcp_routes.iter().map(|r| r.name.clone()).collect();
    let udp_names: Vec<String> = config.udp_routes.iter().map(|r| r.name.clone()).collect();
    let api_key = config.admin.api_key.clone();

    let server = Server::bind(config).await.unwrap();
    let tcp = tcp_names
        .into_iter()
        .map(|n| {
            let addr = server.tcp_addr(&n).unwrap();
            (n, addr)
        })
        .collect();
    let udp = udp_names
        .into_iter()
        .map(|n| {
            let addr = server.udp_addr(&n).unwrap();
            (n, addr)
        })
        .collect();
    let state = AdminState {
        api_key: api_key.as_str().into(),
        runtime: server.runtime(),
    };
    let admin = server.admin_addr();

    let (updates, rx) = mpsc::unbounded_channel();
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(rx, shutdown.subscribe()));

    Running {
        tcp,
        udp,
        admin,
        state,
        updates,
        shutdown,
        handle,
    }
}

fn routes(backend: SocketAddr, udp_backend: SocketAddr) -> String {
    format!(
        r#"
        [needles.deny]
        endpoint = "127.0.0.1:1"

        [needles.allow]
        endpoint = "127.0.0.1:1"
        [needles.allow.decision]
        onError = "accept"

        [[tcp_routes]]
        name = "plain"
        bind_address = "127.0.0.1:0"
        backend = "{backend}"

        [[tcp_routes]]
        name = "allowed"
        bind_address = "127.0.0.1:0"
        backend = "{backend}"
        needle = {{ id = "allow" }}

        [[tcp_routes]]
        name = "denied"
        bind_address = "127.0.0.1:0"
        backend = "{backend}"
        needle = {{ id = "deny", metadata = {{ tenant = "a" }} }}

        [[tcp_routes]]
        name = "ghost"
        bind_address = "127.0.0.1:0"
        backend = "{backend}"
        needle = {{ id = "missing" }}

        [[udp_routes]]
        name = "dns"
        bind_address = "127.0.0.1:0"
        backend = "{udp_backend}"

        [[udp_routes]]
        name = "dns-denied"
        bind_address = "127.0.0.1:0"
        backend = "{udp_backend}"
        needle = {{ id = "deny" }}
        "#
    )
}

async fn fixture() -> (SocketAddr, SocketAddr, ProxyConfig) {
    let tcp = common::start_tcp_echo().await;
    let udp = common::start_udp_echo().await;
    let config = common::config(&routes(tcp, udp));
    (tcp, udp, config)
}

#[tokio::test]
async fn routes_follow_their_needle_policy() {
    let (_, _, config) = fixture().await;
    let running = start(config).await;

    assert_eq!(common::tcp_roundtrip(running.tcp("plain"), b"hi").await.as_deref(), Some(&b"hi"[..]));
    assert_eq!(common::tcp_roundtrip(running.tcp("allowed"), b"hi").await.as_deref(), Some(&b"hi"[..]));
    assert_eq!(common::tcp_roundtrip(running.tcp("denied"), b"hi").await, None);
    assert_eq!(common::tcp_roundtrip(running.tcp("ghost"), b"hi").await, None);

    running.stop().await;
}

#[tokio::test]
async fn udp_routes_forward_or_drop() {
    let (_, _, config) = fixture().await;
    let running = start(config).await;

    assert_eq!(common::udp_roundtrip(running.udp("dns"), b"query").await.as_deref(), Some(&b"query"[..]));
    assert_eq!(common::udp_roundtrip(running.udp("dns-denied"), b"query").await, None);

    running.stop().await;
}

#[tokio::test]
async fn reload_swaps_generation_for_new_connections() {
    let (_, _, config) = fixture().await;
    let mut next = config.clone();
    let running = start(config).await;
    assert_eq!(running.state.runtime.load().generation(), 0);

    assert!(common::tcp_roundtrip(running.tcp("plain"), b"x").await.is_some());

    next.tcp_routes[0].needle = Some(needleware_proxy::config::schema::NeedleRefConfig {
        id: "deny".to_string(),
        metadata: None,
    });
    running.updates.send(next).unwrap();
    running.wait_for_generation(1).await;

    assert_eq!(common::tcp_roundtrip(running.tcp("plain"), b"x").await, None);
    let routes = running.state.runtime.load().routes().to_vec();
    let plain = routes.iter().find(|r| r.name == "plain").unwrap();
    assert_eq!(plain.needle.as_deref(), Some("deny"));

    running.stop().await;
}

#[tokio::test]
async fn admin_requires_bearer_token() {
    let (_, _, mut config) = fixture().await;
    config.admin.api_key = "secret".to_string();
    let running = start(config).await;
    let router = setup_admin_router(running.state.clone());

    let res = router
        .clone()
        .oneshot(Request::builder().uri("/admin/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/status")
                .header(AUTHORIZATION, "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = router
        .oneshot(
            Request::builder()
                .uri("/admin/status")
                .header(AUTHORIZATION, "Bearer secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let status: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status["generation"], 0);

    running.stop().await;
}

#[tokio::test]
async fn admin_reports_needles_and_routes() {
    let (_, _, mut config) = fixture().await;
    config.admin.enabled = true;
    config.admin.api_key = "secret".to_string();
    config.admin.bind_address = "127.0.0.1:0".to_string();
    let running = start(config).await;
    let admin = running.admin.unwrap();
    let client = reqwest::Client::new();

    let needles: Value = client
        .get(format!("http://{}/admin/needles", admin))
        .bearer_auth("secret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(needles["deny"]["status"], "enabled");
    assert_eq!(needles["deny"]["used_by_tcp_routes"], serde_json::json!(["denied"]));
    assert_eq!(needles["deny"]["used_by_udp_routes"], serde_json::json!(["dns-denied"]));

    let routes: Value = client
        .get(format!("http://{}/admin/routes", admin))
        .bearer_auth("secret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ghost = routes
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["name"] == "ghost")
        .unwrap();
    assert_eq!(ghost["enabled"], false);
    assert_eq!(ghost["error"], "unknown needle \"missing\"");

    running.stop().await;
}
