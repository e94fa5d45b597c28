//! Pipeline Orchestrator.
//!
//! extract → (profile extraction ∥ PII identification) → anonymize + completeness check
//! → skills analysis on anonymized text → consolidate.
//!
//! Only extraction is fatal. The completion-backed stages degrade: a failed profile leaves
//! an all-null profile, a failed PII call sends the unredacted text on with a warning, a
//! failed completeness check skips skills analysis, and a failed analysis still returns the
//! profile. The whole run sits under one deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::contact_scan;
use super::models::{
    AiCallLog, AnonymizationSummary, CandidateProfile, ConsolidatedResult, DocumentSummary,
    ErrorStage, PiiIdentification, ProcessingError, ProcessingMetadata, ProcessingStatus,
    ProfessionalAnalysis, ProfileEnvelope, RecoveryAction, TokenUsageSummary,
};
use super::prompts;
use crate::anonymizer::{anonymize, verify_completeness, MatchPolicy};
use crate::audit::logger::CallLogger;
use crate::audit::models::{SessionStatus, Stage};
use crate::extraction::{Document, DocumentError, DocumentExtractor};
use crate::llm_client::prompts::{JSON_ONLY_SYSTEM, VALIDATION_REMINDER};
use crate::llm_client::resilience::ResilientClient;
use crate::llm_client::response::ResponseSchema;
use crate::llm_client::{CompletionError, CompletionRequest};

/// Deployment names of the three completion capabilities.
#[derive(Debug, Clone)]
pub struct CapabilityIds {
    pub profile_extractor: String,
    pub pii_identifier: String,
    pub skills_analyst: String,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub capabilities: CapabilityIds,
    pub processing_timeout: Duration,
    /// Extra asks for a stage whose answer failed validation.
    pub max_validation_retries: u32,
    pub match_policy: MatchPolicy,
}

/// Run-local state. Survives the deadline so a timed-out run still reports what it had.
#[derive(Default)]
struct RunState {
    document: Option<DocumentSummary>,
    profile: Option<CandidateProfile>,
    analysis: Option<ProfessionalAnalysis>,
    anonymization: AnonymizationSummary,
    errors: Vec<ProcessingError>,
}

impl RunState {
    fn record(&mut self, stage: ErrorStage, error: &CompletionError, recovery: RecoveryAction) {
        self.errors.push(ProcessingError::new(
            stage,
            error.error_type(),
            error.to_string(),
            recovery,
        ));
    }
}

pub struct Pipeline {
    extractor: DocumentExtractor,
    client: Arc<ResilientClient>,
    logger: Arc<CallLogger>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        extractor: DocumentExtractor,
        client: Arc<ResilientClient>,
        logger: Arc<CallLogger>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            extractor,
            client,
            logger,
            settings,
        }
    }

    /// Runs one document through every stage and returns the consolidated result.
    ///
    /// Never fails: a fatal problem comes back as `processingStatus = Failed` with the
    /// error in `processingErrors`.
    pub async fn process(&self, document: Document, job_title: &str) -> ConsolidatedResult {
        let started = Instant::now();
        let file_name = document.file_name().to_string();
        let correlation_id = self.logger.start_session(&file_name, job_title);
        let mut run = RunState::default();

        let deadline = self.settings.processing_timeout;
        let status = match tokio::time::timeout(
            deadline,
            self.run(document, job_title, &correlation_id, &mut run),
        )
        .await
        {
            Ok(status) => status,
            Err(_) => {
                error!(
                    correlation_id = %correlation_id,
                    timeout_ms = deadline.as_millis() as u64,
                    "Processing deadline exceeded, abandoning in-flight calls"
                );
                run.errors.push(ProcessingError::new(
                    ErrorStage::Pipeline,
                    "TIMEOUT_ERROR",
                    format!("Processing exceeded the {}s deadline", deadline.as_secs_f64()),
                    RecoveryAction::PipelineAborted,
                ));
                ProcessingStatus::Failed
            }
        };

        let session_status = match status {
            ProcessingStatus::Success => SessionStatus::Completed,
            ProcessingStatus::Failed => SessionStatus::Failed,
        };
        if let Err(e) = self.logger.finalize(&correlation_id, session_status) {
            warn!(correlation_id = %correlation_id, error = %e, "Session could not be finalized");
        }

        let entries = self.logger.entries(&correlation_id).unwrap_or_else(|e| {
            warn!(correlation_id = %correlation_id, error = %e, "Call log unavailable");
            Vec::new()
        });

        let partial_processing = status == ProcessingStatus::Success && !run.errors.is_empty();
        let total_processing_time_ms = started.elapsed().as_millis() as u64;

        info!(
            correlation_id = %correlation_id,
            status = ?status,
            partial_processing,
            calls = entries.len(),
            duration_ms = total_processing_time_ms,
            "Processing finished"
        );

        ConsolidatedResult {
            processing_status: status,
            processing_metadata: ProcessingMetadata {
                total_processing_time_ms,
                file_name,
                job_title: job_title.to_string(),
                correlation_id,
                processed_at: chrono::Utc::now(),
                document: run.document,
            },
            candidate_profile: run.profile.unwrap_or_default(),
            professional_analysis: run.analysis,
            ai_call_logs: entries.iter().map(AiCallLog::from).collect(),
            token_usage_summary: TokenUsageSummary::from_entries(&entries),
            processing_errors: run.errors,
            partial_processing,
            anonymization: run.anonymization,
        }
    }

    async fn run(
        &self,
        document: Document,
        job_title: &str,
        correlation_id: &str,
        run: &mut RunState,
    ) -> ProcessingStatus {
        // Stage 1: extraction is CPU-bound and fatal on failure
        let extractor = self.extractor.clone();
        let extracted = tokio::task::spawn_blocking(move || extractor.extract(&document))
            .await
            .unwrap_or_else(|e| {
                Err(DocumentError::Extraction(format!(
                    "Extraction task did not complete: {e}"
                )))
            });
        let extracted = match extracted {
            Ok(text) => text,
            Err(e) => {
                if e.is_input_validation() {
                    warn!(correlation_id, error_type = e.error_type(), error = %e, "Document rejected");
                } else {
                    error!(
                        correlation_id,
                        error_type = e.error_type(),
                        error = %e,
                        "Document extraction failed"
                    );
                }
                run.errors.push(ProcessingError::new(
                    ErrorStage::DocumentProcessing,
                    e.error_type(),
                    e.to_string(),
                    RecoveryAction::PipelineAborted,
                ));
                return ProcessingStatus::Failed;
            }
        };
        run.document = Some(DocumentSummary {
            page_count: extracted.page_count,
            char_count: extracted.char_count,
            metadata: extracted.metadata.clone(),
        });

        // Stage 2: independent calls, dispatched together
        let caps = &self.settings.capabilities;
        let profile_prompt = prompts::profile_extraction(job_title, &extracted.content);
        let pii_prompt = prompts::pii_identification(&extracted.content);
        let (profile, pii) = tokio::join!(
            self.ask::<ProfileEnvelope>(
                Stage::ProfileExtraction,
                &caps.profile_extractor,
                &profile_prompt,
                correlation_id
            ),
            self.ask::<PiiIdentification>(
                Stage::PiiIdentification,
                &caps.pii_identifier,
                &pii_prompt,
                correlation_id
            ),
        );

        let profile = match profile {
            Ok(envelope) => {
                let mut profile = envelope.candidate_profile;
                if profile.job_title.is_none() {
                    profile.job_title = Some(job_title.to_string());
                }
                let filled = contact_scan::fill_missing(
                    &mut profile,
                    contact_scan::scan(&extracted.content),
                );
                if !filled.is_empty() {
                    debug!(correlation_id, fields = ?filled, "Contact fields filled from text scan");
                }
                profile
            }
            Err(e) => {
                warn!(
                    correlation_id,
                    error_type = e.error_type(),
                    "Profile extraction failed, continuing with an empty profile"
                );
                run.record(
                    ErrorStage::ProfileExtraction,
                    &e,
                    RecoveryAction::ContinuedWithEmptyProfile,
                );
                CandidateProfile::default()
            }
        };
        run.profile = Some(profile);

        // Stage 3: anonymize, then prove nothing identified is still readable
        let analysis_text = match pii {
            Ok(identified) => {
                let entities = identified.pii_entities;
                let policy = self.settings.match_policy;
                let anonymized = anonymize(&extracted.content, &entities, policy);
                run.anonymization = AnonymizationSummary {
                    applied: false,
                    entity_count: entities.len(),
                    placeholders_issued: anonymized.mapping.records().len(),
                    total_replacements: anonymized.mapping.total_replacements(),
                };
                match verify_completeness(&anonymized.text, &entities, policy) {
                    Ok(()) => {
                        run.anonymization.applied = true;
                        info!(
                            correlation_id,
                            entities = entities.len(),
                            replacements = run.anonymization.total_replacements,
                            "Text anonymized"
                        );
                        Some(anonymized.text)
                    }
                    Err(e) => {
                        error!(
                            correlation_id,
                            error = %e,
                            "Anonymization incomplete, skills analysis skipped"
                        );
                        run.errors.push(ProcessingError::new(
                            ErrorStage::Anonymization,
                            e.error_type(),
                            e.to_string(),
                            RecoveryAction::SkillsAnalysisSkipped,
                        ));
                        None
                    }
                }
            }
            Err(e) => {
                warn!(
                    correlation_id,
                    error_type = e.error_type(),
                    "PII identification failed, skills analysis will run on unredacted text"
                );
                run.record(
                    ErrorStage::PiiIdentification,
                    &e,
                    RecoveryAction::SkillsAnalysisOnUnredactedText,
                );
                Some(extracted.content.clone())
            }
        };

        // Stage 4: depends on stage 3 output
        if let Some(text) = analysis_text {
            let prompt = prompts::skills_analysis(job_title, &text);
            match self
                .ask::<ProfessionalAnalysis>(
                    Stage::SkillsAnalysis,
                    &caps.skills_analyst,
                    &prompt,
                    correlation_id,
                )
                .await
            {
                Ok(analysis) => run.analysis = Some(analysis),
                Err(e) => {
                    warn!(
                        correlation_id,
                        error_type = e.error_type(),
                        "Skills analysis failed, returning profile only"
                    );
                    run.record(
                        ErrorStage::SkillsAnalysis,
                        &e,
                        RecoveryAction::ReturnedProfileOnly,
                    );
                }
            }
        }

        ProcessingStatus::Success
    }

    /// One stage call. An answer that fails validation is asked for again, with a reminder
    /// appended, up to `max_validation_retries` times.
    async fn ask<T: ResponseSchema>(
        &self,
        stage: Stage,
        capability_id: &str,
        prompt: &str,
        correlation_id: &str,
    ) -> Result<T, CompletionError> {
        let recorder = self.logger.recorder(correlation_id, stage);
        let mut reminder: Option<String> = None;
        let mut validation_retries = 0;

        loop {
            let request = CompletionRequest {
                capability_id,
                system: JSON_ONLY_SYSTEM,
                prompt: reminder.as_deref().unwrap_or(prompt),
            };
            match self.client.invoke::<T>(&request, Some(&recorder)).await {
                Ok(parsed) => return Ok(parsed.value),
                Err(e)
                    if e.is_response_integrity()
                        && validation_retries < self.settings.max_validation_retries =>
                {
                    validation_retries += 1;
                    warn!(
                        correlation_id,
                        stage = stage.as_str(),
                        error = %e,
                        "Response failed validation, asking again"
                    );
                    reminder = Some(format!("{prompt}{VALIDATION_REMINDER}"));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
