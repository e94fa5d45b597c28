use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::models::{
    AuditReport, CallLogEntry, PerformanceSummary, ProcessingSession, ReplayBundle, ReplayItem,
    SessionStatus, Stage, StageBreakdown,
};
use crate::llm_client::resilience::{AttemptOutcome, AttemptRecord, CallObserver};
use crate::llm_client::Usage;

const TRUNCATION_MARKER: &str = "... [TRUNCATED]";

/// Lookup failure; the only way a read can fail.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown session '{0}'")]
pub struct UnknownSession(pub String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuditError {
    #[error(transparent)]
    UnknownSession(#[from] UnknownSession),

    #[error("Session '{0}' is already finalized")]
    SessionFinalized(String),

    #[error("A session can only be finalized as completed or failed")]
    InvalidStatus,
}

/// Everything the logger needs to know about one attempt.
#[derive(Debug, Clone, Copy)]
pub struct CallDetails<'a> {
    pub stage: Stage,
    pub capability_id: &'a str,
    pub attempt: u32,
    pub prompt: &'a str,
    pub response_text: Option<&'a str>,
    pub usage: Usage,
    pub model: Option<&'a str>,
    pub cost: f64,
    pub duration: Duration,
}

struct SessionRecord {
    session: ProcessingSession,
    entries: Vec<CallLogEntry>,
}

#[derive(Default)]
struct Store {
    sessions: HashMap<String, SessionRecord>,
    order: VecDeque<String>,
}

/// Process-wide audit trail of sessions and completion calls.
///
/// Prompts and responses are stored truncated to `max_text_chars`, alongside a SHA-256
/// of the full text. The oldest sessions are evicted once `retention` is exceeded.
pub struct CallLogger {
    max_text_chars: usize,
    retention: usize,
    store: Mutex<Store>,
}

impl CallLogger {
    pub fn new(max_text_chars: usize, retention: usize) -> Self {
        Self {
            max_text_chars,
            retention: retention.max(1),
            store: Mutex::new(Store::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn start_session(&self, file_name: &str, job_title: &str) -> String {
        let correlation_id = new_correlation_id();
        let session = ProcessingSession {
            correlation_id: correlation_id.clone(),
            file_name: file_name.to_string(),
            job_title: job_title.to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: SessionStatus::InProgress,
            call_ids: Vec::new(),
            performance_summary: None,
        };

        let mut store = self.lock();
        store.sessions.insert(
            correlation_id.clone(),
            SessionRecord {
                session,
                entries: Vec::new(),
            },
        );
        store.order.push_back(correlation_id.clone());
        while store.order.len() > self.retention {
            if let Some(evicted) = store.order.pop_front() {
                store.sessions.remove(&evicted);
            }
        }

        info!(correlation_id = %correlation_id, file_name, job_title, "Processing session started");
        correlation_id
    }

    pub fn log_success(
        &self,
        correlation_id: &str,
        details: CallDetails<'_>,
    ) -> Result<String, AuditError> {
        info!(
            correlation_id,
            stage = details.stage.as_str(),
            attempt = details.attempt,
            duration_ms = details.duration.as_millis() as u64,
            tokens = details.usage.prompt_tokens + details.usage.completion_tokens,
            "Completion call logged"
        );
        self.append(correlation_id, details, None)
    }

    pub fn log_failure(
        &self,
        correlation_id: &str,
        details: CallDetails<'_>,
        error_type: &str,
        error_details: &str,
    ) -> Result<String, AuditError> {
        error!(
            correlation_id,
            stage = details.stage.as_str(),
            attempt = details.attempt,
            error_type,
            "Failed completion call logged"
        );
        self.append(correlation_id, details, Some((error_type, error_details)))
    }

    fn append(
        &self,
        correlation_id: &str,
        details: CallDetails<'_>,
        failure: Option<(&str, &str)>,
    ) -> Result<String, AuditError> {
        let call_id = Uuid::new_v4().to_string();
        let (input_prompt, input_truncated) = truncate(details.prompt, self.max_text_chars);
        let (response_text, response_truncated) = match details.response_text {
            Some(text) => {
                let (t, truncated) = truncate(text, self.max_text_chars);
                (Some(t), truncated)
            }
            None => (None, false),
        };

        let entry = CallLogEntry {
            call_id: call_id.clone(),
            correlation_id: correlation_id.to_string(),
            stage: details.stage,
            capability_id: details.capability_id.to_string(),
            attempt: details.attempt,
            success: failure.is_none(),
            timestamp: Utc::now(),
            duration_ms: details.duration.as_millis() as u64,
            model_used: details.model.map(str::to_string),
            input_prompt,
            input_truncated,
            input_hash: content_hash(details.prompt),
            response_text,
            response_truncated,
            response_hash: details.response_text.map(content_hash),
            input_tokens: details.usage.prompt_tokens,
            output_tokens: details.usage.completion_tokens,
            estimated_cost: details.cost,
            error_type: failure.map(|(t, _)| t.to_string()),
            error_details: failure.map(|(_, d)| d.to_string()),
        };

        let mut store = self.lock();
        let record = store
            .sessions
            .get_mut(correlation_id)
            .ok_or_else(|| UnknownSession(correlation_id.to_string()))?;
        if record.session.status != SessionStatus::InProgress {
            return Err(AuditError::SessionFinalized(correlation_id.to_string()));
        }
        record.session.call_ids.push(call_id.clone());
        record.entries.push(entry);
        Ok(call_id)
    }

    /// Closes the session exactly once and computes its performance summary.
    pub fn finalize(
        &self,
        correlation_id: &str,
        status: SessionStatus,
    ) -> Result<PerformanceSummary, AuditError> {
        if status == SessionStatus::InProgress {
            return Err(AuditError::InvalidStatus);
        }
        let mut store = self.lock();
        let record = store
            .sessions
            .get_mut(correlation_id)
            .ok_or_else(|| UnknownSession(correlation_id.to_string()))?;
        if record.session.status != SessionStatus::InProgress {
            return Err(AuditError::SessionFinalized(correlation_id.to_string()));
        }

        let end_time = Utc::now();
        let mut summary = summarize(&record.entries);
        summary.session_duration_ms = (end_time - record.session.start_time).num_milliseconds();

        record.session.end_time = Some(end_time);
        record.session.status = status;
        record.session.performance_summary = Some(summary.clone());

        info!(
            correlation_id,
            status = ?status,
            total_calls = summary.total_calls,
            failed_calls = summary.failed_calls,
            session_duration_ms = summary.session_duration_ms,
            "Processing session finalized"
        );
        Ok(summary)
    }

    pub fn session(&self, correlation_id: &str) -> Result<ProcessingSession, UnknownSession> {
        self.lock()
            .sessions
            .get(correlation_id)
            .map(|r| r.session.clone())
            .ok_or_else(|| UnknownSession(correlation_id.to_string()))
    }

    /// Entries in the order they were written, which is call-completion order.
    pub fn entries(&self, correlation_id: &str) -> Result<Vec<CallLogEntry>, UnknownSession> {
        self.lock()
            .sessions
            .get(correlation_id)
            .map(|r| r.entries.clone())
            .ok_or_else(|| UnknownSession(correlation_id.to_string()))
    }

    pub fn audit_report(&self, correlation_id: &str) -> Result<AuditReport, UnknownSession> {
        let store = self.lock();
        let record = store
            .sessions
            .get(correlation_id)
            .ok_or_else(|| UnknownSession(correlation_id.to_string()))?;

        let mut stage_breakdown: BTreeMap<Stage, StageBreakdown> = BTreeMap::new();
        for entry in &record.entries {
            let stage = stage_breakdown.entry(entry.stage).or_default();
            stage.call_count += 1;
            if entry.success {
                stage.successful_calls += 1;
            } else {
                stage.failed_calls += 1;
            }
            stage.total_duration_ms += entry.duration_ms;
            stage.total_input_tokens += u64::from(entry.input_tokens);
            stage.total_output_tokens += u64::from(entry.output_tokens);
            stage.estimated_cost += entry.estimated_cost;
        }
        for stage in stage_breakdown.values_mut() {
            stage.average_duration_ms = stage.total_duration_ms as f64 / stage.call_count as f64;
        }

        let entries = &record.entries;
        let successful_calls = entries.iter().filter(|e| e.success).count();
        Ok(AuditReport {
            correlation_id: record.session.correlation_id.clone(),
            file_name: record.session.file_name.clone(),
            job_title: record.session.job_title.clone(),
            status: record.session.status,
            start_time: record.session.start_time,
            end_time: record.session.end_time,
            total_calls: entries.len(),
            successful_calls,
            failed_calls: entries.len() - successful_calls,
            total_duration_ms: entries.iter().map(|e| e.duration_ms).sum(),
            total_input_tokens: entries.iter().map(|e| u64::from(e.input_tokens)).sum(),
            total_output_tokens: entries.iter().map(|e| u64::from(e.output_tokens)).sum(),
            estimated_cost: entries.iter().map(|e| e.estimated_cost).sum(),
            stage_breakdown,
            calls: entries.clone(),
        })
    }

    /// Successful calls only, each with the prompt that produced it.
    pub fn export_for_replay(&self, correlation_id: &str) -> Result<ReplayBundle, UnknownSession> {
        let store = self.lock();
        let record = store
            .sessions
            .get(correlation_id)
            .ok_or_else(|| UnknownSession(correlation_id.to_string()))?;

        let items = record
            .entries
            .iter()
            .filter(|e| e.success)
            .filter_map(|e| {
                Some(ReplayItem {
                    call_id: e.call_id.clone(),
                    stage: e.stage,
                    capability_id: e.capability_id.clone(),
                    prompt: e.input_prompt.clone(),
                    prompt_hash: e.input_hash.clone(),
                    response_hash: e.response_hash.clone()?,
                    replayable: !e.input_truncated,
                })
            })
            .collect();

        Ok(ReplayBundle {
            correlation_id: correlation_id.to_string(),
            exported_at: Utc::now(),
            items,
        })
    }

    /// Observer that writes every attempt of one stage into this session.
    pub fn recorder<'a>(&'a self, correlation_id: &'a str, stage: Stage) -> SessionRecorder<'a> {
        SessionRecorder {
            logger: self,
            correlation_id,
            stage,
        }
    }
}

pub struct SessionRecorder<'a> {
    logger: &'a CallLogger,
    correlation_id: &'a str,
    stage: Stage,
}

impl CallObserver for SessionRecorder<'_> {
    fn on_attempt(&self, record: &AttemptRecord<'_>) {
        let result = match &record.outcome {
            AttemptOutcome::Success {
                response_text,
                usage,
                model,
                cost,
            } => self.logger.log_success(
                self.correlation_id,
                CallDetails {
                    stage: self.stage,
                    capability_id: record.capability_id,
                    attempt: record.attempt,
                    prompt: record.prompt,
                    response_text: Some(*response_text),
                    usage: *usage,
                    model: Some(*model),
                    cost: *cost,
                    duration: record.duration,
                },
            ),
            AttemptOutcome::Failure {
                error,
                response_text,
                usage,
                cost,
            } => self.logger.log_failure(
                self.correlation_id,
                CallDetails {
                    stage: self.stage,
                    capability_id: record.capability_id,
                    attempt: record.attempt,
                    prompt: record.prompt,
                    response_text: *response_text,
                    usage: usage.unwrap_or_default(),
                    model: None,
                    cost: *cost,
                    duration: record.duration,
                },
                error.error_type(),
                &error.to_string(),
            ),
        };
        if let Err(e) = result {
            warn!(correlation_id = self.correlation_id, error = %e, "Completion call not recorded");
        }
    }
}

/// `proc_YYYYMMDD_HHMMSS_<8 hex>`
fn new_correlation_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("proc_{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
}

pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

fn truncate(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => (format!("{}{TRUNCATION_MARKER}", &text[..cut]), true),
        None => (text.to_string(), false),
    }
}

fn summarize(entries: &[CallLogEntry]) -> PerformanceSummary {
    if entries.is_empty() {
        return PerformanceSummary::default();
    }
    let total = entries.len();
    let durations: Vec<u64> = entries
        .iter()
        .filter(|e| e.success)
        .map(|e| e.duration_ms)
        .collect();
    let successful = durations.len();
    let total_input: u64 = entries.iter().map(|e| u64::from(e.input_tokens)).sum();
    let total_output: u64 = entries.iter().map(|e| u64::from(e.output_tokens)).sum();

    PerformanceSummary {
        total_calls: total,
        successful_calls: successful,
        failed_calls: total - successful,
        success_rate: successful as f64 / total as f64 * 100.0,
        average_duration_ms: if successful > 0 {
            durations.iter().sum::<u64>() as f64 / successful as f64
        } else {
            0.0
        },
        min_duration_ms: durations.iter().copied().min().unwrap_or(0),
        max_duration_ms: durations.iter().copied().max().unwrap_or(0),
        total_input_tokens: total_input,
        total_output_tokens: total_output,
        average_input_tokens: total_input as f64 / total as f64,
        average_output_tokens: total_output as f64 / total as f64,
        estimated_cost: entries.iter().map(|e| e.estimated_cost).sum(),
        session_duration_ms: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::CompletionError;

    fn details<'a>(stage: Stage, prompt: &'a str, response: Option<&'a str>) -> CallDetails<'a> {
        CallDetails {
            stage,
            capability_id: "cap",
            attempt: 1,
            prompt,
            response_text: response,
            usage: Usage {
                prompt_tokens: 120,
                completion_tokens: 30,
            },
            model: Some("gpt-4o-mini"),
            cost: 0.001,
            duration: Duration::from_millis(250),
        }
    }

    #[test]
    fn test_correlation_id_format() {
        let id = new_correlation_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts[0], "proc");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 8);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_truncation_is_char_safe_and_marked() {
        let (short, truncated) = truncate("héllo", 10);
        assert_eq!(short, "héllo");
        assert!(!truncated);
        let (cut, truncated) = truncate("héllo wörld", 4);
        assert_eq!(cut, "héll... [TRUNCATED]");
        assert!(truncated);
    }

    #[test]
    fn test_entries_keep_hash_of_full_text() {
        let logger = CallLogger::new(5, 10);
        let id = logger.start_session("cv.pdf", "Data Analyst");
        let prompt = "a very long prompt";
        logger
            .log_success(&id, details(Stage::ProfileExtraction, prompt, Some("{}")))
            .unwrap();
        let entry = &logger.entries(&id).unwrap()[0];
        assert!(entry.input_truncated);
        assert_eq!(entry.input_hash, content_hash(prompt));
        assert_eq!(entry.response_hash.as_deref(), Some(content_hash("{}").as_str()));
    }

    #[test]
    fn test_every_call_is_one_entry_in_completion_order() {
        let logger = CallLogger::new(100, 10);
        let id = logger.start_session("cv.pdf", "Data Analyst");
        let a = logger
            .log_success(&id, details(Stage::PiiIdentification, "p", Some("{}")))
            .unwrap();
        let b = logger
            .log_failure(
                &id,
                details(Stage::ProfileExtraction, "p", None),
                "TIMEOUT_ERROR",
                "timed out",
            )
            .unwrap();
        let session = logger.session(&id).unwrap();
        assert_eq!(session.call_ids, vec![a, b]);
        let entries = logger.entries(&id).unwrap();
        assert!(entries[0].success);
        assert_eq!(entries[1].error_type.as_deref(), Some("TIMEOUT_ERROR"));
    }

    #[test]
    fn test_finalize_exactly_once() {
        let logger = CallLogger::new(100, 10);
        let id = logger.start_session("cv.pdf", "Data Analyst");
        logger
            .log_success(&id, details(Stage::SkillsAnalysis, "p", Some("{}")))
            .unwrap();
        let summary = logger.finalize(&id, SessionStatus::Completed).unwrap();
        assert_eq!(summary.total_calls, 1);
        assert_eq!(summary.success_rate, 100.0);
        assert_eq!(
            logger.finalize(&id, SessionStatus::Failed),
            Err(AuditError::SessionFinalized(id.clone()))
        );
        assert!(matches!(
            logger.log_success(&id, details(Stage::SkillsAnalysis, "p", Some("{}"))),
            Err(AuditError::SessionFinalized(_))
        ));
        let session = logger.session(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.end_time.is_some());
    }

    #[test]
    fn test_finalize_rejects_in_progress() {
        let logger = CallLogger::new(100, 10);
        let id = logger.start_session("cv.pdf", "Data Analyst");
        assert_eq!(
            logger.finalize(&id, SessionStatus::InProgress),
            Err(AuditError::InvalidStatus)
        );
    }

    #[test]
    fn test_performance_summary_uses_successful_durations() {
        let logger = CallLogger::new(100, 10);
        let id = logger.start_session("cv.pdf", "Data Analyst");
        let mut slow = details(Stage::ProfileExtraction, "p", Some("{}"));
        slow.duration = Duration::from_millis(900);
        logger.log_success(&id, slow).unwrap();
        logger
            .log_success(&id, details(Stage::PiiIdentification, "p", Some("{}")))
            .unwrap();
        let mut failed = details(Stage::SkillsAnalysis, "p", None);
        failed.duration = Duration::from_millis(5000);
        failed.usage = Usage::default();
        logger
            .log_failure(&id, failed, "CONNECTION_ERROR", "refused")
            .unwrap();

        let summary = logger.finalize(&id, SessionStatus::Completed).unwrap();
        assert_eq!(summary.total_calls, 3);
        assert_eq!(summary.failed_calls, 1);
        assert_eq!(summary.min_duration_ms, 250);
        assert_eq!(summary.max_duration_ms, 900);
        assert_eq!(summary.average_duration_ms, 575.0);
        assert_eq!(summary.total_input_tokens, 240);
    }

    #[test]
    fn test_audit_report_breaks_down_by_stage() {
        let logger = CallLogger::new(100, 10);
        let id = logger.start_session("cv.pdf", "Data Analyst");
        logger
            .log_failure(
                &id,
                details(Stage::ProfileExtraction, "p", Some("oops")),
                "RESPONSE_VALIDATION_ERROR",
                "malformed JSON",
            )
            .unwrap();
        logger
            .log_success(&id, details(Stage::ProfileExtraction, "p", Some("{}")))
            .unwrap();
        logger
            .log_success(&id, details(Stage::SkillsAnalysis, "p", Some("{}")))
            .unwrap();

        let report = logger.audit_report(&id).unwrap();
        assert_eq!(report.total_calls, 3);
        assert_eq!(report.failed_calls, 1);
        assert_eq!(report.total_input_tokens, 360);
        let profile = &report.stage_breakdown[&Stage::ProfileExtraction];
        assert_eq!(profile.call_count, 2);
        assert_eq!(profile.successful_calls, 1);
        assert!(!report.stage_breakdown.contains_key(&Stage::PiiIdentification));
        assert!((report.estimated_cost - 0.003).abs() < 1e-12);
    }

    #[test]
    fn test_replay_export_only_successful_calls() {
        let logger = CallLogger::new(10, 10);
        let id = logger.start_session("cv.pdf", "Data Analyst");
        logger
            .log_success(&id, details(Stage::ProfileExtraction, "short", Some("{\"a\":1}")))
            .unwrap();
        logger
            .log_failure(
                &id,
                details(Stage::PiiIdentification, "short", None),
                "TIMEOUT_ERROR",
                "timed out",
            )
            .unwrap();
        logger
            .log_success(
                &id,
                details(Stage::SkillsAnalysis, "a prompt longer than ten", Some("{}")),
            )
            .unwrap();

        let bundle = logger.export_for_replay(&id).unwrap();
        assert_eq!(bundle.items.len(), 2);
        assert_eq!(bundle.items[0].stage, Stage::ProfileExtraction);
        assert_eq!(bundle.items[0].prompt, "short");
        assert!(bundle.items[0].replayable);
        assert_eq!(bundle.items[0].response_hash, content_hash("{\"a\":1}"));
        assert!(!bundle.items[1].replayable);
    }

    #[test]
    fn test_unknown_session() {
        let logger = CallLogger::new(100, 10);
        assert_eq!(
            logger.audit_report("proc_missing").unwrap_err(),
            UnknownSession("proc_missing".to_string())
        );
    }

    #[test]
    fn test_oldest_sessions_are_evicted() {
        let logger = CallLogger::new(100, 2);
        let first = logger.start_session("a.pdf", "x");
        let second = logger.start_session("b.pdf", "x");
        let third = logger.start_session("c.pdf", "x");
        assert!(logger.session(&first).is_err());
        assert!(logger.session(&second).is_ok());
        assert!(logger.session(&third).is_ok());
    }

    #[test]
    fn test_recorder_writes_attempts_for_its_stage() {
        let logger = CallLogger::new(100, 10);
        let id = logger.start_session("cv.pdf", "Data Analyst");
        let recorder = logger.recorder(&id, Stage::PiiIdentification);
        let error = CompletionError::Validation("malformed JSON".to_string());
        recorder.on_attempt(&AttemptRecord {
            capability_id: "pii",
            prompt: "find pii",
            attempt: 1,
            duration: Duration::from_millis(40),
            outcome: AttemptOutcome::Failure {
                error: &error,
                response_text: Some("not json"),
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 2,
                }),
                cost: 0.0001,
            },
        });
        let entries = logger.entries(&id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].stage, Stage::PiiIdentification);
        assert!(!entries[0].success);
        assert_eq!(entries[0].input_tokens, 10);
        assert_eq!(
            entries[0].error_type.as_deref(),
            Some("RESPONSE_VALIDATION_ERROR")
        );
    }
}
