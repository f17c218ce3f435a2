//! Control and read endpoint handlers.

use crate::claims::store::OperateError;
use crate::error::FactlineError;
use crate::server::auth::{AUTH_HEADER, AUTH_QUERY};
use crate::server::AppState;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Endpoint auth tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Control,
    Read,
}

/// API failure, rendered as a JSON error body.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    RateLimited,
    NotFound,
    BadRequest(String),
    Conflict(serde_json::Value),
    Unavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "ok": false, "error": "unauthorized" }),
            ),
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "ok": false, "error": "rate_limited" }),
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                json!({ "ok": false, "error": "not_found" }),
            ),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                json!({ "ok": false, "error": "bad_request", "message": message }),
            ),
            ApiError::Conflict(body) => (StatusCode::CONFLICT, body),
            ApiError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "ok": false, "error": "unavailable" }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

impl From<FactlineError> for ApiError {
    fn from(error: FactlineError) -> Self {
        match error {
            FactlineError::InvalidSourceUrl { url } => {
                ApiError::BadRequest(format!("invalid source URL: {url}"))
            }
            FactlineError::RunAlreadyActive { run_id } => ApiError::Conflict(json!({
                "ok": false,
                "error": "run_already_active",
                "runId": run_id,
            })),
            FactlineError::NoActiveRun => ApiError::Conflict(json!({
                "ok": false,
                "error": "no_active_run",
            })),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<OperateError> for ApiError {
    fn from(error: OperateError) -> Self {
        match error {
            OperateError::NotFound => ApiError::NotFound,
            OperateError::VersionConflict { current } => ApiError::Conflict(json!({
                "ok": false,
                "error": "version_conflict",
                "currentVersion": current,
            })),
            OperateError::PolicyBlocked { reason } => ApiError::Conflict(json!({
                "ok": false,
                "error": "policy_blocked",
                "reason": reason,
                "message": reason.human_message(),
            })),
            OperateError::InvalidTag => ApiError::BadRequest("unknown claim type tag".to_string()),
            OperateError::ReasonRequired => {
                ApiError::BadRequest("a non-empty reason is required".to_string())
            }
            OperateError::TagLockedWhileApproved => ApiError::Conflict(json!({
                "ok": false,
                "error": "tag_locked",
                "message": "tag cannot change while the claim is approved",
            })),
            OperateError::NotApproved => ApiError::Conflict(json!({
                "ok": false,
                "error": "not_approved",
                "message": "claim has not been approved",
            })),
            OperateError::Unavailable => ApiError::Unavailable,
        }
    }
}

/// Rate-limit and authenticate one request.
pub fn guard(
    state: &AppState,
    addr: &SocketAddr,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    route: &str,
    tier: Tier,
) -> Result<(), ApiError> {
    if !state.limiter.allow(addr.ip(), route) {
        return Err(ApiError::RateLimited);
    }
    let supplied = headers
        .get(AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| query.get(AUTH_QUERY).map(|s| s.as_str()));
    let allowed = match tier {
        Tier::Control => state.auth.allows_control(supplied),
        Tier::Read => state.auth.allows_read(supplied),
    };
    if allowed {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBody {
    pub youtube_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionBody {
    pub expected_version: u64,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderBody {
    pub expected_version: u64,
    #[serde(default)]
    pub force: Option<bool>,
    #[serde(default)]
    pub force_nonce: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagBody {
    pub expected_version: u64,
    pub tag: String,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn start(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<StartBody>,
) -> Result<Response, ApiError> {
    guard(&state, &addr, &headers, &query, "/start", Tier::Control)?;
    let run_id = state.controller.start(&body.youtube_url).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "ok": true, "runId": run_id })),
    )
        .into_response())
}

pub async fn stop(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    guard(&state, &addr, &headers, &query, "/stop", Tier::Control)?;
    state.controller.stop().await;
    Ok(Json(json!({ "ok": true, "running": false })).into_response())
}

pub async fn claims(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    guard(&state, &addr, &headers, &query, "/claims", Tier::Read)?;
    let status = state.controller.status().await;
    let (run_id, claims) = state.hub.list_claims().await;
    Ok(Json(json!({
        "ok": true,
        "running": status.running,
        "runId": run_id,
        "claims": claims,
    }))
    .into_response())
}

pub async fn approve_output(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(claim_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<VersionBody>,
) -> Result<Response, ApiError> {
    guard(
        &state,
        &addr,
        &headers,
        &query,
        "/claims/approve-output",
        Tier::Control,
    )?;
    let (claim, package, render_job) = state
        .orchestrator
        .approve_output(&claim_id, body.expected_version, body.reason)
        .await?;
    Ok(Json(json!({
        "ok": true,
        "claim": claim,
        "package": package,
        "renderJob": render_job,
    }))
    .into_response())
}

pub async fn reject_output(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(claim_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<VersionBody>,
) -> Result<Response, ApiError> {
    guard(
        &state,
        &addr,
        &headers,
        &query,
        "/claims/reject-output",
        Tier::Control,
    )?;
    let claim = state
        .orchestrator
        .reject_output(&claim_id, body.expected_version, body.reason)
        .await?;
    Ok(Json(json!({ "ok": true, "claim": claim })).into_response())
}

pub async fn generate_package(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(claim_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<VersionBody>,
) -> Result<Response, ApiError> {
    guard(
        &state,
        &addr,
        &headers,
        &query,
        "/claims/generate-package",
        Tier::Control,
    )?;
    let (claim, package) = state
        .orchestrator
        .generate_package(&claim_id, body.expected_version, body.reason)
        .await?;
    Ok(Json(json!({ "ok": true, "claim": claim, "package": package })).into_response())
}

pub async fn render_image(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(claim_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<RenderBody>,
) -> Result<Response, ApiError> {
    guard(
        &state,
        &addr,
        &headers,
        &query,
        "/claims/render-image",
        Tier::Control,
    )?;
    let (claim, package, render_job) = state
        .orchestrator
        .render_image(
            &claim_id,
            body.expected_version,
            body.force.unwrap_or(false),
            body.force_nonce,
        )
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "ok": true,
            "claim": claim,
            "package": package,
            "renderJob": render_job,
        })),
    )
        .into_response())
}

pub async fn tag_override(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(claim_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<TagBody>,
) -> Result<Response, ApiError> {
    guard(
        &state,
        &addr,
        &headers,
        &query,
        "/claims/tag-override",
        Tier::Control,
    )?;
    let claim = state
        .orchestrator
        .tag_override(
            &claim_id,
            body.expected_version,
            &body.tag,
            body.reason.as_deref().unwrap_or(""),
        )
        .await?;
    Ok(Json(json!({ "ok": true, "claim": claim })).into_response())
}
