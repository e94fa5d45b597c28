pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::audit::handlers as audit;
use crate::pipeline::handlers as pipeline;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.request_body_limit();

    Router::new()
        .route("/health", get(health::health_handler))
        // Processing API
        .route("/api/v1/process", post(pipeline::handle_process))
        // Audit API
        .route(
            "/api/v1/sessions/:correlation_id",
            get(audit::handle_get_session),
        )
        .route(
            "/api/v1/sessions/:correlation_id/audit",
            get(audit::handle_audit_report),
        )
        .route(
            "/api/v1/sessions/:correlation_id/replay",
            get(audit::handle_export_replay).post(audit::handle_run_replay),
        )
        .route("/api/v1/usage", get(audit::handle_usage))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
