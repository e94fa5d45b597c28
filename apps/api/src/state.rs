use std::sync::Arc;

use crate::audit::logger::CallLogger;
use crate::config::Config;
use crate::extraction::{DocumentExtractor, ExtractionLimits};
use crate::llm_client::circuit_breaker::CircuitBreaker;
use crate::llm_client::rate_limiter::SlidingWindowLimiter;
use crate::llm_client::resilience::{ResilienceSettings, ResilientClient};
use crate::llm_client::usage::{PricingTable, TokenTracker};
use crate::llm_client::CompletionBackend;
use crate::pipeline::{CapabilityIds, Pipeline, PipelineSettings};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Process-wide audit trail; the pipeline writes to the same instance.
    pub logger: Arc<CallLogger>,
    /// The one resilient client, so replays share the rate limit and breaker.
    pub client: Arc<ResilientClient>,
    pub config: Config,
}

impl AppState {
    /// Wires the process-wide limiter, breaker and token tracker around `backend`.
    pub fn new(config: Config, backend: Arc<dyn CompletionBackend>) -> Self {
        let client = Arc::new(ResilientClient::new(
            backend,
            Arc::new(SlidingWindowLimiter::per_minute(config.requests_per_minute)),
            Arc::new(CircuitBreaker::new(
                config.circuit_failure_threshold,
                config.circuit_cooldown,
            )),
            Arc::new(TokenTracker::new(
                PricingTable::default().with_default_model(config.completion_model.clone()),
            )),
            ResilienceSettings {
                max_retries: config.max_retries,
                rate_limit_max_wait: config.rate_limit_max_wait,
                ..ResilienceSettings::default()
            },
        ));

        let logger = Arc::new(CallLogger::new(
            config.log_max_text_chars,
            config.audit_retention_sessions,
        ));

        let extractor = DocumentExtractor::new(ExtractionLimits {
            max_file_size: config.max_file_size_bytes(),
            min_page_count: config.min_page_count,
            max_page_count: config.max_page_count,
            min_text_length: config.min_text_length,
        });

        let pipeline = Arc::new(Pipeline::new(
            extractor,
            client.clone(),
            logger.clone(),
            PipelineSettings {
                capabilities: CapabilityIds {
                    profile_extractor: config.profile_extractor_capability_id.clone(),
                    pii_identifier: config.pii_identifier_capability_id.clone(),
                    skills_analyst: config.skills_analyst_capability_id.clone(),
                },
                processing_timeout: config.processing_timeout,
                max_validation_retries: config.max_validation_retries,
                match_policy: config.anonymizer_match_policy,
            },
        ));

        Self {
            pipeline,
            logger,
            client,
            config,
        }
    }
}
