//! REST API handlers.
//!
//! Each handler reads via `StateStore` or drives `FleetManager`, and
//! returns JSON responses in a `{success, data, error}` envelope.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use runnergrid_fleet::ManagerError;
use runnergrid_state::{FleetSpec, ScalingConfig};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn manager_error_response(e: ManagerError) -> axum::response::Response {
    let status = match &e {
        ManagerError::Invalid(_) => StatusCode::BAD_REQUEST,
        ManagerError::AlreadyEnabled(_) => StatusCode::CONFLICT,
        ManagerError::NotEnabled(_) => StatusCode::NOT_FOUND,
        ManagerError::State(_) | ManagerError::ControllerUnavailable(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(&e.to_string(), status).into_response()
}

// ── Fleets ─────────────────────────────────────────────────────

/// GET /api/v1/fleets
pub async fn list_fleets(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_fleets() {
        Ok(fleets) => ApiResponse::ok(fleets).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// Request body for enabling a fleet.
#[derive(serde::Deserialize)]
pub struct EnableFleetRequest {
    pub id: String,
    pub repo: String,
    pub labels: Vec<String>,
    #[serde(default)]
    pub runner_group: Option<String>,
    pub scaling: ScalingConfig,
}

/// POST /api/v1/fleets
pub async fn enable_fleet(
    State(state): State<ApiState>,
    Json(req): Json<EnableFleetRequest>,
) -> impl IntoResponse {
    let now = epoch_secs();
    let spec = FleetSpec {
        id: req.id,
        repo: req.repo,
        labels: req.labels,
        runner_group: req.runner_group,
        scaling: req.scaling,
        enabled: true,
        created_at: now,
        updated_at: now,
    };

    match state.manager.enable_fleet(spec.clone()).await {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(spec)).into_response(),
        Err(e) => manager_error_response(e),
    }
}

/// GET /api/v1/fleets/:id
pub async fn get_fleet(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_fleet(&id) {
        Ok(Some(spec)) => ApiResponse::ok(spec).into_response(),
        Ok(None) => error_response("fleet not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// Query parameters for disable.
#[derive(serde::Deserialize)]
pub struct DisableQuery {
    #[serde(default)]
    pub drain: bool,
}

/// DELETE /api/v1/fleets/:id?drain=true
pub async fn disable_fleet(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<DisableQuery>,
) -> impl IntoResponse {
    match state.manager.disable_fleet(&id, query.drain).await {
        Ok(()) => ApiResponse::ok(serde_json::json!({
            "fleet": id,
            "drained": query.drain,
        }))
        .into_response(),
        Err(e) => manager_error_response(e),
    }
}

// ── Status & workers ───────────────────────────────────────────

/// GET /api/v1/fleets/:id/status
pub async fn fleet_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.fleet_status(&id) {
        Ok(status) => {
            let last_decision = state.store.get_decision(&id).ok().flatten();
            ApiResponse::ok(serde_json::json!({
                "status": status,
                "last_decision": last_decision,
            }))
            .into_response()
        }
        Err(e) => manager_error_response(e),
    }
}

/// GET /api/v1/fleets/:id/workers
pub async fn list_workers(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.list_workers_for_fleet(&id) {
        Ok(workers) => ApiResponse::ok(workers).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Scaling ────────────────────────────────────────────────────

/// Scale request body.
#[derive(serde::Deserialize)]
pub struct ScaleRequest {
    pub target: u32,
}

/// POST /api/v1/fleets/:id/scale
pub async fn scale_fleet(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<ScaleRequest>,
) -> impl IntoResponse {
    match state.manager.scale_fleet(&id, req.target).await {
        Ok(decision) => ApiResponse::ok(serde_json::json!({
            "fleet": id,
            "action": decision.action,
            "target": decision.target,
            "current": decision.current,
            "reason": decision.reason,
        }))
        .into_response(),
        Err(e) => manager_error_response(e),
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
