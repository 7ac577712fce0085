//! REST observation surface: health, session summaries, tenant stats.
//!
//! The SaaS layer owns the full dashboard; these endpoints expose the
//! runtime's own state for operators and the admission `stats` contract.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use vx_domain::session::{Session, SessionStatus};

use crate::state::AppState;
use crate::ws;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/call", get(ws::call_ws))
        .route("/v1/health", get(health))
        .route("/v1/sessions", get(list_sessions))
        .route("/v1/tenants/:tenant_id/stats", get(tenant_stats))
}

// ── Error envelope ─────────────────────────────────────────────────

struct ApiError(vx_domain::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            vx_domain::Error::NotFound(_) => StatusCode::NOT_FOUND,
            vx_domain::Error::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<vx_domain::Error> for ApiError {
    fn from(err: vx_domain::Error) -> Self {
        Self(err)
    }
}

// ── Handlers ───────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.len(),
    }))
}

#[derive(Debug, Deserialize)]
struct SessionsQuery {
    tenant: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionSummary {
    session_id: String,
    call_id: String,
    status: SessionStatus,
    started_at: chrono::DateTime<chrono::Utc>,
    turn_count: u32,
    error_count: u32,
}

impl From<Session> for SessionSummary {
    fn from(session: Session) -> Self {
        Self {
            session_id: session.session_id,
            call_id: session.spec.call_id,
            status: session.status,
            started_at: session.started_at,
            turn_count: session.metrics.turn_count,
            error_count: session.metrics.error_count,
        }
    }
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionsQuery>,
) -> Json<Vec<SessionSummary>> {
    let mut summaries: Vec<SessionSummary> = state
        .sessions
        .list_by_tenant(&query.tenant)
        .into_iter()
        .map(SessionSummary::from)
        .collect();
    summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Json(summaries)
}

async fn tenant_stats(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<vx_admission::AdmissionStats>, ApiError> {
    let stats = state.admission.stats(&tenant_id).await?;
    Ok(Json(stats))
}
