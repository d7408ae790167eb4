//! Axum-based mentor gateway: session-scoped workspaces, velocity and quota
//! gating, and the streamed chat pipeline against the upstream model.
//!
//! The router and state live here so integration tests can drive the full
//! HTTP surface without binding a socket; `main.rs` only wires the
//! environment and serves.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod quota;
pub mod store;
pub mod throttle;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use config::GatewayConfig;
use dojo_core::ModelClient;
use quota::QuotaLedger;
use std::sync::Arc;
use store::WorkspaceStore;
use throttle::VelocityThrottle;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<WorkspaceStore>,
    pub throttle: Arc<VelocityThrottle>,
    pub quota: Arc<QuotaLedger>,
    pub model: Arc<ModelClient>,
    pub config: Arc<GatewayConfig>,
}

pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(state.config.cors_origin.as_deref());

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/chat", post(handlers::chat::submit_turn))
        .route(
            "/api/workspaces",
            post(handlers::workspaces::create_workspace).get(handlers::workspaces::list_workspaces),
        )
        .route(
            "/api/workspaces/:id",
            get(handlers::workspaces::fetch_workspace)
                .patch(handlers::workspaces::update_workspace_persona)
                .delete(handlers::workspaces::delete_workspace),
        )
        .route(
            "/api/levels",
            post(handlers::levels::create_level).patch(handlers::levels::update_level),
        )
        .layer(cors)
        .with_state(state)
}

/// An exact configured origin gets credentialed CORS; otherwise the
/// permissive dev posture.
fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let Some(origin) = origin else {
        return CorsLayer::permissive();
    };
    match origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE])
            .allow_credentials(true),
        Err(_) => {
            tracing::warn!(
                target: "dojo::server",
                origin,
                "DOJO_CORS_ORIGIN is not a valid header value; falling back to permissive CORS"
            );
            CorsLayer::permissive()
        }
    }
}
