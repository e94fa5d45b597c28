use serde::{Deserialize, Serialize};

use crate::anonymizer::PiiEntity;
use crate::audit::models::CallLogEntry;
use crate::extraction::ExtractionMetadata;
use crate::llm_client::response::ResponseSchema;

// ────────────────────────────────────────────────────────────────────────────
// Stage responses
// ────────────────────────────────────────────────────────────────────────────

/// Candidate facts pulled from the CV. Every field is nullable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateProfile {
    #[serde(default)]
    pub candidate_name: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub candidate_email: Option<String>,
    #[serde(default)]
    pub candidate_phone: Option<String>,
    #[serde(default, rename = "linkedInUrl")]
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub other_profile_urls: Option<Vec<String>>,
    #[serde(default)]
    pub current_location: Option<String>,
    #[serde(default)]
    pub current_title: Option<String>,
    #[serde(default)]
    pub current_company: Option<String>,
    #[serde(default)]
    pub professional_headline: Option<String>,
    #[serde(default)]
    pub total_experience_years: Option<f64>,
    #[serde(default)]
    pub relevant_experience_years: Option<f64>,
    #[serde(default)]
    pub highest_qualification: Option<String>,
    #[serde(default)]
    pub current_salary: Option<String>,
    #[serde(default)]
    pub expected_salary: Option<String>,
    #[serde(default)]
    pub availability_status: Option<String>,
    #[serde(default)]
    pub visa_status: Option<String>,
}

/// The profile-extraction capability wraps its answer in `candidateProfile`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileEnvelope {
    pub candidate_profile: CandidateProfile,
}

impl ResponseSchema for ProfileEnvelope {
    fn check(&self) -> Result<(), String> {
        let profile = &self.candidate_profile;
        for (field, years) in [
            ("totalExperienceYears", profile.total_experience_years),
            ("relevantExperienceYears", profile.relevant_experience_years),
        ] {
            if let Some(y) = years {
                if !(0.0..=80.0).contains(&y) {
                    return Err(format!("{field} out of range: {y}"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct PiiIdentification {
    pub pii_entities: Vec<PiiEntity>,
}

impl ResponseSchema for PiiIdentification {
    fn check(&self) -> Result<(), String> {
        for (i, entity) in self.pii_entities.iter().enumerate() {
            if entity.original_value.trim().is_empty() {
                return Err(format!("pii_entities[{i}] has an empty original_value"));
            }
            if !(1..=4).contains(&entity.sensitivity_level) {
                return Err(format!(
                    "pii_entities[{i}] sensitivity_level {} is outside 1-4",
                    entity.sensitivity_level
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetrics {
    pub ai_confidence_score: f64,
    #[serde(default)]
    pub ai_remarks: String,
    pub overall_fit_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreSkill {
    pub skill_name: String,
    #[serde(default)]
    pub proficiency_level: Option<String>,
    #[serde(default)]
    pub years_of_experience: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkExperience {
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub company_size: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub key_responsibilities: Vec<String>,
    #[serde(default)]
    pub key_achievements: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EducationProfile {
    #[serde(default)]
    pub highest_degree_level: Option<String>,
    #[serde(default)]
    pub field_of_study: Option<String>,
    #[serde(default)]
    pub relevant_certifications: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfessionalProfile {
    #[serde(default)]
    pub core_skills: Vec<CoreSkill>,
    #[serde(default)]
    pub work_experience: Vec<WorkExperience>,
    #[serde(default)]
    pub education_profile: EducationProfile,
}

/// Skills analysis, always produced from anonymized text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfessionalAnalysis {
    pub analysis_metrics: AnalysisMetrics,
    pub professional_profile: ProfessionalProfile,
}

impl ResponseSchema for ProfessionalAnalysis {
    fn check(&self) -> Result<(), String> {
        let m = &self.analysis_metrics;
        if !(0.0..=100.0).contains(&m.ai_confidence_score) {
            return Err(format!("aiConfidenceScore out of range: {}", m.ai_confidence_score));
        }
        if !(0.0..=100.0).contains(&m.overall_fit_score) {
            return Err(format!("overallFitScore out of range: {}", m.overall_fit_score));
        }
        if let Some(skill) = self
            .professional_profile
            .core_skills
            .iter()
            .find(|s| s.skill_name.trim().is_empty())
        {
            return Err(format!("core skill with empty name: {skill:?}"));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Consolidated result
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessingStatus {
    Success,
    Failed,
}

/// Where in the run a processing error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStage {
    DocumentProcessing,
    ProfileExtraction,
    PiiIdentification,
    Anonymization,
    SkillsAnalysis,
    Pipeline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    PipelineAborted,
    ContinuedWithEmptyProfile,
    SkillsAnalysisOnUnredactedText,
    SkillsAnalysisSkipped,
    ReturnedProfileOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn for_error_type(error_type: &str) -> Self {
        match error_type {
            "AUTHENTICATION_ERROR" | "ANONYMIZATION_INTEGRITY_ERROR" => Severity::High,
            "TIMEOUT_ERROR"
            | "SERVICE_ERROR"
            | "CIRCUIT_BREAKER_OPEN_ERROR"
            | "EXTRACTION_ERROR" => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingError {
    pub stage: ErrorStage,
    pub error_type: String,
    pub message: String,
    pub recovery_action: RecoveryAction,
    pub severity: Severity,
}

impl ProcessingError {
    pub fn new(
        stage: ErrorStage,
        error_type: &str,
        message: impl Into<String>,
        recovery_action: RecoveryAction,
    ) -> Self {
        Self {
            stage,
            error_type: error_type.to_string(),
            message: message.into(),
            recovery_action,
            severity: Severity::for_error_type(error_type),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub page_count: usize,
    pub char_count: usize,
    #[serde(flatten)]
    pub metadata: ExtractionMetadata,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetadata {
    pub total_processing_time_ms: u64,
    pub file_name: String,
    pub job_title: String,
    pub correlation_id: String,
    pub processed_at: chrono::DateTime<chrono::Utc>,
    pub document: Option<DocumentSummary>,
}

/// Outbound view of one completion attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiCallLog {
    pub call_id: String,
    pub stage: crate::audit::models::Stage,
    pub attempt: u32,
    pub success: bool,
    pub duration_ms: u64,
    pub model_used: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl From<&CallLogEntry> for AiCallLog {
    fn from(entry: &CallLogEntry) -> Self {
        Self {
            call_id: entry.call_id.clone(),
            stage: entry.stage,
            attempt: entry.attempt,
            success: entry.success,
            duration_ms: entry.duration_ms,
            model_used: entry.model_used.clone(),
            input_tokens: entry.input_tokens,
            output_tokens: entry.output_tokens,
            error_details: entry.error_details.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsageSummary {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost: f64,
}

impl TokenUsageSummary {
    pub fn from_entries(entries: &[CallLogEntry]) -> Self {
        let total_input_tokens: u64 = entries.iter().map(|e| u64::from(e.input_tokens)).sum();
        let total_output_tokens: u64 = entries.iter().map(|e| u64::from(e.output_tokens)).sum();
        Self {
            total_input_tokens,
            total_output_tokens,
            total_tokens: total_input_tokens + total_output_tokens,
            estimated_cost: entries.iter().map(|e| e.estimated_cost).sum(),
        }
    }
}

/// Counts only; original values never leave the process.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymizationSummary {
    pub applied: bool,
    pub entity_count: usize,
    pub placeholders_issued: usize,
    pub total_replacements: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedResult {
    pub processing_status: ProcessingStatus,
    pub processing_metadata: ProcessingMetadata,
    pub candidate_profile: CandidateProfile,
    pub professional_analysis: Option<ProfessionalAnalysis>,
    pub ai_call_logs: Vec<AiCallLog>,
    pub token_usage_summary: TokenUsageSummary,
    pub processing_errors: Vec<ProcessingError>,
    pub partial_processing: bool,
    pub anonymization: AnonymizationSummary,
}

impl ConsolidatedResult {
    /// The error that failed the run, if it failed.
    pub fn fatal_error(&self) -> Option<&ProcessingError> {
        if self.processing_status != ProcessingStatus::Failed {
            return None;
        }
        self.processing_errors.iter().find(|e| {
            matches!(
                e.stage,
                ErrorStage::DocumentProcessing | ErrorStage::Pipeline
            )
        })
    }
}
