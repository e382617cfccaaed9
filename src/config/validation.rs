//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, addresses parse)
//! - Detect conflicting routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Needle definitions are left to the needle resolver; a bad needle
//!   disables itself, it never rejects the snapshot

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{ProxyConfig, RouteConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("duplicate route name {0:?}")]
    DuplicateRouteName(String),

    #[error("route {route:?}: invalid bind_address {addr:?}")]
    InvalidBindAddress { route: String, addr: String },

    #[error("route {0:?}: backend is required")]
    EmptyBackend(String),

    #[error("route {0:?}: needle id is empty")]
    EmptyNeedleId(String),

    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),

    #[error("{field}: invalid address {addr:?}")]
    InvalidAddress { field: &'static str, addr: String },
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut names = HashSet::new();
    for route in config.tcp_routes.iter().chain(config.udp_routes.iter()) {
        if !names.insert(route.name.as_str()) {
            errors.push(ValidationError::DuplicateRouteName(route.name.clone()));
        }
        validate_route(route, &mut errors);
    }

    let limits = &config.limits;
    for (field, value) in [
        ("limits.max_connections", limits.max_connections),
        ("limits.udp_session_idle_secs", limits.udp_session_idle_secs as usize),
        ("limits.notify_queue_capacity", limits.notify_queue_capacity),
        ("limits.notify_concurrency", limits.notify_concurrency),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroLimit(field));
        }
    }

    if config.admin.enabled {
        check_addr("admin.bind_address", &config.admin.bind_address, &mut errors);
    }
    if config.observability.metrics_enabled {
        check_addr(
            "observability.metrics_address",
            &config.observability.metrics_address,
            &mut errors,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_route(route: &RouteConfig, errors: &mut Vec<ValidationError>) {
    if route.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress {
            route: route.name.clone(),
            addr: route.bind_address.clone(),
        });
    }
    if route.backend.trim().is_empty() {
        errors.push(ValidationError::EmptyBackend(route.name.clone()));
    }
    if let Some(needle) = &route.needle {
        if needle.id.trim().is_empty() {
            errors.push(ValidationError::EmptyNeedleId(route.name.clone()));
        }
    }
}

fn check_addr(field: &'static str, addr: &str, errors: &mut Vec<ValidationError>) {
    if addr.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            addr: addr.to_string(),
        });
    }
}
