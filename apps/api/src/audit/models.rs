use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Completion-backed pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ProfileExtraction,
    PiiIdentification,
    SkillsAnalysis,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ProfileExtraction => "profile_extraction",
            Stage::PiiIdentification => "pii_identification",
            Stage::SkillsAnalysis => "skills_analysis",
        }
    }
}

/// One completion-service attempt. Immutable once written.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLogEntry {
    pub call_id: String,
    pub correlation_id: String,
    pub stage: Stage,
    pub capability_id: String,
    pub attempt: u32,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub model_used: Option<String>,
    pub input_prompt: String,
    pub input_truncated: bool,
    pub input_hash: String,
    pub response_text: Option<String>,
    pub response_truncated: bool,
    pub response_hash: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub estimated_cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub total_calls: usize,
    pub successful_calls: usize,
    pub failed_calls: usize,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub average_input_tokens: f64,
    pub average_output_tokens: f64,
    pub estimated_cost: f64,
    pub session_duration_ms: i64,
}

/// One document run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingSession {
    pub correlation_id: String,
    pub file_name: String,
    pub job_title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub call_ids: Vec<String>,
    pub performance_summary: Option<PerformanceSummary>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageBreakdown {
    pub call_count: usize,
    pub successful_calls: usize,
    pub failed_calls: usize,
    pub total_duration_ms: u64,
    pub average_duration_ms: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub estimated_cost: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub correlation_id: String,
    pub file_name: String,
    pub job_title: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_calls: usize,
    pub successful_calls: usize,
    pub failed_calls: usize,
    pub total_duration_ms: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub estimated_cost: f64,
    pub stage_breakdown: BTreeMap<Stage, StageBreakdown>,
    pub calls: Vec<CallLogEntry>,
}

/// A successful call in a form that can be re-issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayItem {
    pub call_id: String,
    pub stage: Stage,
    pub capability_id: String,
    pub prompt: String,
    pub prompt_hash: String,
    pub response_hash: String,
    /// False when the stored prompt was truncated and can no longer reproduce the call.
    pub replayable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayBundle {
    pub correlation_id: String,
    pub exported_at: DateTime<Utc>,
    pub items: Vec<ReplayItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    Matched,
    Drifted,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayOutcome {
    pub call_id: String,
    pub stage: Stage,
    pub status: ReplayStatus,
    pub original_response_hash: String,
    pub replay_response_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub correlation_id: String,
    pub replayed_at: DateTime<Utc>,
    pub matched: usize,
    pub drifted: usize,
    pub failed: usize,
    pub skipped: usize,
    pub items: Vec<ReplayOutcome>,
}
