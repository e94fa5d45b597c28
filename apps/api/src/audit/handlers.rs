//! Axum route handlers for the audit trail and usage API.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::audit::models::{AuditReport, ProcessingSession, ReplayBundle, ReplayReport};
use crate::audit::replay::replay;
use crate::errors::AppError;
use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::llm_client::resilience::ClientStatus;
use crate::state::AppState;

/// GET /api/v1/sessions/:correlation_id
pub async fn handle_get_session(
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
) -> Result<Json<ProcessingSession>, AppError> {
    Ok(Json(state.logger.session(&correlation_id)?))
}

/// GET /api/v1/sessions/:correlation_id/audit
pub async fn handle_audit_report(
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
) -> Result<Json<AuditReport>, AppError> {
    Ok(Json(state.logger.audit_report(&correlation_id)?))
}

/// GET /api/v1/sessions/:correlation_id/replay
pub async fn handle_export_replay(
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
) -> Result<Json<ReplayBundle>, AppError> {
    Ok(Json(state.logger.export_for_replay(&correlation_id)?))
}

/// POST /api/v1/sessions/:correlation_id/replay
///
/// Re-issues the session's successful calls and reports which responses drifted.
pub async fn handle_run_replay(
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
) -> Result<Json<ReplayReport>, AppError> {
    let bundle = state.logger.export_for_replay(&correlation_id)?;
    Ok(Json(replay(&state.client, &bundle, JSON_ONLY_SYSTEM).await))
}

/// GET /api/v1/usage
pub async fn handle_usage(State(state): State<AppState>) -> Json<ClientStatus> {
    Json(state.client.status())
}
