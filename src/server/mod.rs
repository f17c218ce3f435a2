//! HTTP control surface.
//!
//! Request/response endpoints for run control and claim actions, plus the
//! long-lived SSE event stream. Control endpoints require the configured
//! secret; both tiers share a per-IP-per-route rate limit.

pub mod auth;
pub mod routes;
pub mod sse;

use crate::approval::ApprovalOrchestrator;
use crate::config::Config;
use crate::defaults;
use crate::error::Result;
use crate::events::hub::HubHandle;
use crate::run::RunController;
use crate::server::auth::{AuthConfig, RateLimiter};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<RunController>,
    pub hub: HubHandle,
    pub orchestrator: ApprovalOrchestrator,
    pub auth: Arc<AuthConfig>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn auth_from_config(config: &Config) -> (Arc<AuthConfig>, Arc<RateLimiter>) {
        (
            Arc::new(AuthConfig {
                control_password: config.server.control_password.clone(),
                protect_reads: config.server.protect_reads,
            }),
            Arc::new(RateLimiter::new(config.server.rate_limit_per_minute)),
        )
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/start", post(routes::start))
        .route("/stop", post(routes::stop))
        .route("/claims", get(routes::claims))
        .route("/events", get(sse::events))
        .route("/claims/:id/approve-output", post(routes::approve_output))
        .route("/claims/:id/reject-output", post(routes::reject_output))
        .route(
            "/claims/:id/generate-package",
            post(routes::generate_package),
        )
        .route("/claims/:id/render-image", post(routes::render_image))
        .route("/claims/:id/tag-override", post(routes::tag_override))
        .layer(DefaultBodyLimit::max(defaults::HTTP_BODY_LIMIT_BYTES))
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "control surface listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
