//! Scripted completion backend and recording observer shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::resilience::{AttemptOutcome, AttemptRecord, CallObserver};
use super::{CompletionBackend, CompletionError, CompletionRequest, CompletionResponse, Usage};

pub(crate) const SCRIPTED_USAGE: Usage = Usage {
    prompt_tokens: 100,
    completion_tokens: 20,
};

/// Replies per capability id, in order. An exhausted script answers with a
/// non-retryable API error.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, CompletionError>>>>,
    requests: Mutex<Vec<(String, String)>>,
    delay: Duration,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn push(&self, capability_id: &str, outcome: Result<String, CompletionError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(capability_id.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub(crate) fn reply(&self, capability_id: &str, text: &str) {
        self.push(capability_id, Ok(text.to_string()));
    }

    pub(crate) fn fail(&self, capability_id: &str, error: CompletionError) {
        self.push(capability_id, Err(error));
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn calls_for(&self, capability_id: &str) -> usize {
        self.prompts_for(capability_id).len()
    }

    pub(crate) fn prompts_for(&self, capability_id: &str) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(cap, _)| cap == capability_id)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(
        &self,
        request: &CompletionRequest<'_>,
    ) -> Result<CompletionResponse, CompletionError> {
        self.requests.lock().unwrap().push((
            request.capability_id.to_string(),
            request.prompt.to_string(),
        ));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(request.capability_id)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Ok(text)) => Ok(CompletionResponse {
                text,
                usage: SCRIPTED_USAGE,
                model: "gpt-4o-mini".to_string(),
            }),
            Some(Err(e)) => Err(e),
            None => Err(CompletionError::Api {
                status: 400,
                message: format!("no scripted reply for {}", request.capability_id),
            }),
        }
    }
}

/// Observer that keeps `(attempt, success, error_type, duration)` for every attempt.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    seen: Mutex<Vec<(u32, bool, Option<&'static str>, Duration)>>,
}

impl RecordingObserver {
    pub(crate) fn records(&self) -> Vec<(u32, bool, Option<&'static str>, Duration)> {
        self.seen.lock().unwrap().clone()
    }

    pub(crate) fn outcomes(&self) -> Vec<(u32, bool, Option<&'static str>)> {
        self.records()
            .into_iter()
            .map(|(attempt, ok, error_type, _)| (attempt, ok, error_type))
            .collect()
    }
}

impl CallObserver for RecordingObserver {
    fn on_attempt(&self, record: &AttemptRecord<'_>) {
        let (ok, error_type) = match &record.outcome {
            AttemptOutcome::Success { .. } => (true, None),
            AttemptOutcome::Failure { error, .. } => (false, Some(error.error_type())),
        };
        self.seen
            .lock()
            .unwrap()
            .push((record.attempt, ok, error_type, record.duration));
    }
}
