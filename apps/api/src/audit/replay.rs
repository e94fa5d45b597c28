use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use super::logger::content_hash;
use super::models::{ReplayBundle, ReplayOutcome, ReplayReport, ReplayStatus};
use crate::llm_client::resilience::ResilientClient;
use crate::llm_client::CompletionRequest;

/// Re-issues every replayable item of a bundle and compares response hashes.
///
/// Calls go through the resilient client so replays share the process-wide rate limit
/// and breaker, but they are not written to any session.
pub async fn replay(client: &ResilientClient, bundle: &ReplayBundle, system: &str) -> ReplayReport {
    let mut items = Vec::with_capacity(bundle.items.len());

    for item in &bundle.items {
        let outcome = if !item.replayable {
            ReplayOutcome {
                call_id: item.call_id.clone(),
                stage: item.stage,
                status: ReplayStatus::Skipped,
                original_response_hash: item.response_hash.clone(),
                replay_response_hash: None,
                error: Some("stored prompt was truncated".to_string()),
            }
        } else {
            let request = CompletionRequest {
                capability_id: &item.capability_id,
                system,
                prompt: &item.prompt,
            };
            match client.invoke::<Value>(&request, None).await {
                Ok(parsed) => {
                    let hash = content_hash(&parsed.raw_text);
                    let status = if hash == item.response_hash {
                        ReplayStatus::Matched
                    } else {
                        ReplayStatus::Drifted
                    };
                    ReplayOutcome {
                        call_id: item.call_id.clone(),
                        stage: item.stage,
                        status,
                        original_response_hash: item.response_hash.clone(),
                        replay_response_hash: Some(hash),
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(
                        correlation_id = %bundle.correlation_id,
                        call_id = %item.call_id,
                        error_type = e.error_type(),
                        "Replay call failed"
                    );
                    ReplayOutcome {
                        call_id: item.call_id.clone(),
                        stage: item.stage,
                        status: ReplayStatus::Failed,
                        original_response_hash: item.response_hash.clone(),
                        replay_response_hash: None,
                        error: Some(e.to_string()),
                    }
                }
            }
        };
        items.push(outcome);
    }

    let count = |status: ReplayStatus| items.iter().filter(|o| o.status == status).count();
    let report = ReplayReport {
        correlation_id: bundle.correlation_id.clone(),
        replayed_at: Utc::now(),
        matched: count(ReplayStatus::Matched),
        drifted: count(ReplayStatus::Drifted),
        failed: count(ReplayStatus::Failed),
        skipped: count(ReplayStatus::Skipped),
        items,
    };

    info!(
        correlation_id = %report.correlation_id,
        matched = report.matched,
        drifted = report.drifted,
        failed = report.failed,
        skipped = report.skipped,
        "Replay finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::audit::models::{ReplayItem, Stage};
    use crate::llm_client::circuit_breaker::CircuitBreaker;
    use crate::llm_client::rate_limiter::SlidingWindowLimiter;
    use crate::llm_client::resilience::ResilienceSettings;
    use crate::llm_client::testing::ScriptedBackend;
    use crate::llm_client::usage::TokenTracker;
    use crate::llm_client::CompletionError;

    fn item(call_id: &str, capability_id: &str, response: &str, replayable: bool) -> ReplayItem {
        ReplayItem {
            call_id: call_id.to_string(),
            stage: Stage::ProfileExtraction,
            capability_id: capability_id.to_string(),
            prompt: "extract".to_string(),
            prompt_hash: content_hash("extract"),
            response_hash: content_hash(response),
            replayable,
        }
    }

    fn client(backend: Arc<ScriptedBackend>) -> ResilientClient {
        ResilientClient::new(
            backend,
            Arc::new(SlidingWindowLimiter::per_minute(100)),
            Arc::new(CircuitBreaker::new(5, Duration::from_secs(60))),
            Arc::new(TokenTracker::default()),
            ResilienceSettings {
                max_retries: 0,
                ..ResilienceSettings::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_classifies_each_item() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.reply("same", r#"{"a":1}"#);
        backend.reply("changed", r#"{"a":2}"#);
        backend.fail(
            "broken",
            CompletionError::Authentication {
                status: 401,
                message: "bad key".into(),
            },
        );

        let bundle = ReplayBundle {
            correlation_id: "proc_20260101_000000_deadbeef".to_string(),
            exported_at: Utc::now(),
            items: vec![
                item("1", "same", r#"{"a":1}"#, true),
                item("2", "changed", r#"{"a":1}"#, true),
                item("3", "broken", r#"{"a":1}"#, true),
                item("4", "same", r#"{"a":1}"#, false),
            ],
        };

        let report = replay(&client(backend.clone()), &bundle, "system").await;

        let statuses: Vec<ReplayStatus> = report.items.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![
                ReplayStatus::Matched,
                ReplayStatus::Drifted,
                ReplayStatus::Failed,
                ReplayStatus::Skipped
            ]
        );
        assert_eq!(
            (report.matched, report.drifted, report.failed, report.skipped),
            (1, 1, 1, 1)
        );
        assert_eq!(backend.calls(), 3);
    }
}
