use axum::{extract::State, Json};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::admin::AdminState;
use crate::needleware::manager::NeedleInfo;
use crate::server::runtime::RouteStatus;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub generation: u64,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        generation: state.runtime.load().generation(),
    })
}

pub async fn get_needles(State(state): State<AdminState>) -> Json<BTreeMap<String, NeedleInfo>> {
    let runtime = state.runtime.load();
    Json(runtime.manager().infos().clone())
}

pub async fn get_routes(State(state): State<AdminState>) -> Json<Vec<RouteStatus>> {
    let runtime = state.runtime.load();
    Json(runtime.routes().to_vec())
}
