//! Resilient Completion Client.
//!
//! Every completion call in the service passes through [`ResilientClient::invoke`]:
//! circuit breaker → rate limiter → transport → response validation → token accounting,
//! with bounded exponential backoff around the transient failures. A half-open trial that
//! the rate limiter turns away is handed back to the breaker unused.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::circuit_breaker::{Admission, BreakerSnapshot, FailureGate};
use super::rate_limiter::Throttle;
use super::response::{self, ResponseSchema};
use super::usage::{UsageSink, UsageTotals};
use super::{CompletionBackend, CompletionError, CompletionRequest, CompletionResponse, Usage};

#[derive(Debug, Clone)]
pub struct ResilienceSettings {
    /// Additional attempts after the first, for retryable errors only.
    pub max_retries: u32,
    /// First backoff delay; doubles on each further retry.
    pub base_backoff: Duration,
    /// Longest a single attempt may wait for a rate-limiter slot.
    pub rate_limit_max_wait: Duration,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
            rate_limit_max_wait: Duration::from_secs(10),
        }
    }
}

/// A validated response and the text it was parsed from.
#[derive(Debug, Clone)]
pub struct ParsedResponse<T> {
    pub value: T,
    pub raw_text: String,
}

#[derive(Debug)]
pub enum AttemptOutcome<'a> {
    Success {
        response_text: &'a str,
        usage: Usage,
        model: &'a str,
        cost: f64,
    },
    Failure {
        error: &'a CompletionError,
        /// Present when the service answered but the answer was unusable.
        response_text: Option<&'a str>,
        usage: Option<Usage>,
        cost: f64,
    },
}

/// One attempt against the completion service, as reported to observers.
#[derive(Debug)]
pub struct AttemptRecord<'a> {
    pub capability_id: &'a str,
    pub prompt: &'a str,
    pub attempt: u32,
    pub duration: Duration,
    pub outcome: AttemptOutcome<'a>,
}

/// Receives every attempt the client makes. The audit trail implements this.
pub trait CallObserver: Send + Sync {
    fn on_attempt(&self, record: &AttemptRecord<'_>);
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSnapshot {
    pub in_window: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    pub circuit_breaker: BreakerSnapshot,
    pub rate_limit: RateLimitSnapshot,
    pub usage: UsageTotals,
}

pub struct ResilientClient {
    backend: Arc<dyn CompletionBackend>,
    limiter: Arc<dyn Throttle>,
    breaker: Arc<dyn FailureGate>,
    usage: Arc<dyn UsageSink>,
    settings: ResilienceSettings,
}

impl ResilientClient {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        limiter: Arc<dyn Throttle>,
        breaker: Arc<dyn FailureGate>,
        usage: Arc<dyn UsageSink>,
        settings: ResilienceSettings,
    ) -> Self {
        Self {
            backend,
            limiter,
            breaker,
            usage,
            settings,
        }
    }

    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            circuit_breaker: self.breaker.snapshot(),
            rate_limit: RateLimitSnapshot {
                in_window: self.limiter.in_window(),
                capacity: self.limiter.capacity(),
            },
            usage: self.usage.totals(),
        }
    }

    /// Invokes a capability and validates the response against `T`.
    ///
    /// Transient failures are retried with exponential backoff up to `max_retries`.
    /// Authentication failures, response-integrity failures and an open circuit are
    /// returned on the spot.
    pub async fn invoke<T: ResponseSchema>(
        &self,
        request: &CompletionRequest<'_>,
        observer: Option<&dyn CallObserver>,
    ) -> Result<ParsedResponse<T>, CompletionError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.attempt::<T>(request, attempt, observer).await {
                Ok(parsed) => return Ok(parsed),
                Err(e) if e.is_retryable() && attempt <= self.settings.max_retries => {
                    let delay = self.settings.base_backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        capability_id = request.capability_id,
                        attempt,
                        error_type = e.error_type(),
                        delay_ms = delay.as_millis() as u64,
                        "Completion attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        capability_id = request.capability_id,
                        attempt,
                        error_type = e.error_type(),
                        error = %e,
                        "Completion call failed"
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn attempt<T: ResponseSchema>(
        &self,
        request: &CompletionRequest<'_>,
        attempt: u32,
        observer: Option<&dyn CallObserver>,
    ) -> Result<ParsedResponse<T>, CompletionError> {
        let fail = |duration: Duration, error: CompletionError| {
            notify(
                observer,
                request,
                attempt,
                duration,
                AttemptOutcome::Failure {
                    error: &error,
                    response_text: None,
                    usage: None,
                    cost: 0.0,
                },
            );
            error
        };

        let admission = match self.breaker.can_proceed() {
            Ok(admission) => admission,
            Err(retry_after) => {
                return Err(fail(Duration::ZERO, CompletionError::CircuitOpen { retry_after }))
            }
        };

        let waited = Instant::now();
        if let Err(e) = self.acquire_slot().await {
            // Nothing was sent, so a half-open trial goes back unused
            if admission == Admission::Trial {
                self.breaker.release_trial();
            }
            return Err(fail(waited.elapsed(), e));
        }

        let started = Instant::now();
        let result = self.backend.complete(request).await;
        let duration = started.elapsed();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                if matches!(e, CompletionError::Authentication { .. }) {
                    self.breaker.trip();
                } else if e.is_response_integrity() {
                    self.breaker.record_success();
                } else {
                    self.breaker.record_failure();
                }
                return Err(fail(duration, e));
            }
        };

        // Any answer is a breaker success and is billed, whether or not it validates
        self.breaker.record_success();
        let CompletionResponse { text, usage, model } = response;
        let cost = self.usage.record_usage(&model, usage);

        match response::parse_object(&text).and_then(response::conform::<T>) {
            Ok(value) => {
                debug!(
                    capability_id = request.capability_id,
                    attempt,
                    duration_ms = duration.as_millis() as u64,
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Completion attempt succeeded"
                );
                notify(
                    observer,
                    request,
                    attempt,
                    duration,
                    AttemptOutcome::Success {
                        response_text: &text,
                        usage,
                        model: &model,
                        cost,
                    },
                );
                Ok(ParsedResponse {
                    value,
                    raw_text: text,
                })
            }
            Err(e) => {
                notify(
                    observer,
                    request,
                    attempt,
                    duration,
                    AttemptOutcome::Failure {
                        error: &e,
                        response_text: Some(&text),
                        usage: Some(usage),
                        cost,
                    },
                );
                Err(e)
            }
        }
    }

    /// Waits for a rate-limiter slot within the configured budget.
    async fn acquire_slot(&self) -> Result<(), CompletionError> {
        let budget = self.settings.rate_limit_max_wait;
        let mut waited = Duration::ZERO;
        loop {
            if self.limiter.acquire() {
                return Ok(());
            }
            // A zero wait means another caller took the freed slot first; yield briefly
            let wait = self.limiter.wait_time().max(Duration::from_millis(10));
            if waited + wait > budget {
                return Err(CompletionError::LocalRateLimit(budget));
            }
            debug!(wait_ms = wait.as_millis() as u64, "Waiting for rate limiter slot");
            tokio::time::sleep(wait).await;
            waited += wait;
        }
    }
}

fn notify(
    observer: Option<&dyn CallObserver>,
    request: &CompletionRequest<'_>,
    attempt: u32,
    duration: Duration,
    outcome: AttemptOutcome<'_>,
) {
    if let Some(observer) = observer {
        observer.on_attempt(&AttemptRecord {
            capability_id: request.capability_id,
            prompt: request.prompt,
            attempt,
            duration,
            outcome,
        });
    }
}
