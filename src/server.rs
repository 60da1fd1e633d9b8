//! HTTP status and approval surface.
//!
//! Read-only views of missions and their journals, the cancel switch, and
//! the approval queue of the intervention broker.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use conductor_common::{MissionId, RequestId};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::errors::{BrokerError, StoreError};
use crate::intervention::InterventionResponse;
use crate::journal;
use crate::orchestrator::MissionOrchestrator;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: Arc<MissionOrchestrator>,
}

pub type SharedState = Arc<AppState>;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Attach a permissive CORS layer (dashboards on another origin).
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3150,
            cors: false,
        }
    }
}

#[derive(Serialize)]
struct CancelResponse {
    mission_id: MissionId,
    cancelled: bool,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::UnknownRequest(_) => ApiError::NotFound(e.to_string()),
            BrokerError::AlreadyResolved(_)
            | BrokerError::Withdrawn(_)
            | BrokerError::AlreadyPending { .. } => ApiError::Conflict(e.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/missions", get(list_missions))
        .route("/missions/{id}", get(get_mission))
        .route("/missions/{id}/audit", get(get_audit))
        .route("/missions/{id}/checkpoints", get(get_checkpoints))
        .route("/missions/{id}/cancel", post(cancel_mission))
        .route("/interventions", get(list_interventions))
        .route("/interventions/{id}", get(get_intervention))
        .route("/interventions/{id}/resolve", post(resolve_intervention))
        .route("/health", get(health_check))
}

pub fn build_router(state: SharedState, config: &ServerConfig) -> Router {
    let app = api_router().with_state(state);
    if config.cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Bind and serve in the background until `shutdown` fires.
pub async fn spawn_server(
    config: &ServerConfig,
    orchestrator: Arc<MissionOrchestrator>,
    shutdown: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let app = build_router(Arc::new(AppState { orchestrator }), config);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "status server listening");

    let handle = tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = served {
            tracing::error!(error = %e, "status server stopped");
        }
    });
    Ok((local_addr, handle))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_missions(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let orchestrator = state.orchestrator.clone();
    let missions = journal::blocking(move || orchestrator.list_missions()).await?;
    Ok(Json(missions))
}

async fn get_mission(
    State(state): State<SharedState>,
    Path(id): Path<MissionId>,
) -> Result<impl IntoResponse, ApiError> {
    let orchestrator = state.orchestrator.clone();
    journal::blocking(move || orchestrator.mission_status(id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Mission {} not found", id)))
}

async fn get_audit(
    State(state): State<SharedState>,
    Path(id): Path<MissionId>,
) -> Result<impl IntoResponse, ApiError> {
    let audit = state.orchestrator.audit_log();
    let events = journal::blocking(move || audit.events(id)).await?;
    if events.is_empty() {
        return Err(ApiError::NotFound(format!("Mission {} not found", id)));
    }
    Ok(Json(events))
}

async fn get_checkpoints(
    State(state): State<SharedState>,
    Path(id): Path<MissionId>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.orchestrator.checkpoint_store();
    let checkpoints = journal::blocking(move || store.list(id)).await?;
    if checkpoints.is_empty() {
        return Err(ApiError::NotFound(format!("Mission {} not found", id)));
    }
    Ok(Json(checkpoints))
}

async fn cancel_mission(
    State(state): State<SharedState>,
    Path(id): Path<MissionId>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.orchestrator.cancel_mission(id) {
        return Err(ApiError::Conflict(format!("Mission {} is not running", id)));
    }
    Ok(Json(CancelResponse {
        mission_id: id,
        cancelled: true,
    }))
}

async fn list_interventions(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.orchestrator.broker().pending())
}

async fn get_intervention(
    State(state): State<SharedState>,
    Path(id): Path<RequestId>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .orchestrator
        .broker()
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Intervention request {} not found", id)))
}

async fn resolve_intervention(
    State(state): State<SharedState>,
    Path(id): Path<RequestId>,
    Json(response): Json<InterventionResponse>,
) -> Result<impl IntoResponse, ApiError> {
    let response = if response.resolved_by.is_none() {
        response.resolved_by("http")
    } else {
        response
    };
    let resolved = state.orchestrator.broker().resolve(id, response)?;
    Ok(Json(resolved))
}

// ── Tests ─────────────────────────────────────────────────────────────
