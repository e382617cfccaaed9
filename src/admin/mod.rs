//! Read-only admin API.
//!
//! # Data Flow
//! ```text
//! GET /admin/* (Bearer api_key)
//!     → auth.rs (reject with 401 on mismatch)
//!     → handlers.rs (load current Runtime generation)
//!     → JSON snapshot of needles and routes
//! ```

pub mod auth;
pub mod handlers;

use arc_swap::ArcSwap;
use axum::{middleware, routing::get, Router};
use std::sync::Arc;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::server::Runtime;

#[derive(Clone)]
pub struct AdminState {
    pub api_key: Arc<str>,
    pub runtime: Arc<ArcSwap<Runtime>>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/needles", get(get_needles))
        .route("/admin/routes", get(get_routes))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
