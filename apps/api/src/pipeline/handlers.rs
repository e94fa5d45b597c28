//! Axum route handler for the processing API.

use axum::{extract::State, http::StatusCode, Json};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use tracing::info;

use crate::errors::{AppError, AppJson};
use crate::extraction::Document;
use crate::pipeline::models::{ConsolidatedResult, ErrorStage, ProcessingStatus};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    #[serde(default)]
    pub file_name: Option<String>,
    /// Base64-encoded document bytes.
    #[serde(default)]
    pub file_content: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
}

fn required(value: Option<String>, field: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(format!("{field} is required")))
}

fn decode_content(encoded: &str) -> Result<Vec<u8>, AppError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| AppError::Validation(format!("fileContent is not valid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(AppError::Validation("fileContent is empty".to_string()));
    }
    Ok(bytes)
}

/// HTTP status for a finished run. The body is the consolidated result either way.
pub fn status_for(result: &ConsolidatedResult) -> StatusCode {
    if result.processing_status == ProcessingStatus::Success {
        return StatusCode::OK;
    }
    match result.fatal_error() {
        Some(e) if e.error_type == "TIMEOUT_ERROR" => StatusCode::GATEWAY_TIMEOUT,
        Some(e) if e.error_type == "EXTRACTION_ERROR" => StatusCode::UNPROCESSABLE_ENTITY,
        Some(e) if e.stage == ErrorStage::DocumentProcessing => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /api/v1/process
///
/// Runs one CV through extraction, profile extraction, anonymization and skills analysis.
/// Returns 200 for full or partial success; failed runs still carry the full result.
/// A body that is not valid JSON is rejected with the usual validation error.
pub async fn handle_process(
    State(state): State<AppState>,
    AppJson(request): AppJson<ProcessRequest>,
) -> Result<(StatusCode, Json<ConsolidatedResult>), AppError> {
    let file_name = required(request.file_name, "fileName")?;
    let job_title = required(request.job_title, "jobTitle")?;
    let content = required(request.file_content, "fileContent")?;
    let bytes = decode_content(&content)?;

    info!(file_name = %file_name, size_bytes = bytes.len(), job_title = %job_title, "Processing request received");

    let result = state
        .pipeline
        .process(Document::new(file_name, bytes), &job_title)
        .await;

    Ok((status_for(&result), Json(result)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_rejects_blank() {
        assert!(required(None, "fileName").is_err());
        assert!(required(Some("   ".into()), "fileName").is_err());
        assert_eq!(required(Some(" cv.pdf ".into()), "fileName").unwrap(), "cv.pdf");
    }

    #[test]
    fn test_decode_tolerates_line_breaks() {
        assert_eq!(decode_content("aGVs\nbG8=").unwrap(), b"hello");
        assert!(decode_content("not base64!").is_err());
        assert!(decode_content("").is_err());
    }
}
