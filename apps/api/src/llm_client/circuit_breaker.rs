use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

/// How a call got past the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Closed,
    /// The single half-open trial. Its outcome decides the next state.
    Trial,
}

/// Gate in front of the completion service, shared by every pipeline run.
pub trait FailureGate: Send + Sync {
    /// `Ok` admits a call; `Err` carries how long until the next trial is allowed.
    fn can_proceed(&self) -> Result<Admission, Duration>;
    fn record_success(&self);
    fn record_failure(&self);
    /// Hands back a trial that never reached the service, so the next caller gets it.
    fn release_trial(&self);
    /// Opens immediately regardless of the failure count.
    fn trip(&self);
    fn snapshot(&self) -> BreakerSnapshot;
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { since: Instant },
    /// Cooldown over, trial not yet claimed.
    TrialReady,
    HalfOpen { trial_started: Instant },
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    consecutive_failures: u32,
}

/// CLOSED → OPEN after `failure_threshold` consecutive failures; OPEN → HALF_OPEN once
/// `cooldown` has elapsed; a single trial in HALF_OPEN either closes the circuit or
/// re-opens it with a fresh cooldown.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                phase: Phase::Closed,
                consecutive_failures: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn open(&self, inner: &mut Inner, now: Instant) {
        inner.phase = Phase::Open { since: now };
        warn!(
            consecutive_failures = inner.consecutive_failures,
            cooldown_secs = self.cooldown.as_secs(),
            "Circuit breaker opened"
        );
    }
}

impl FailureGate for CircuitBreaker {
    fn can_proceed(&self) -> Result<Admission, Duration> {
        let now = Instant::now();
        let mut inner = self.lock();
        let phase = inner.phase;
        match phase {
            Phase::Closed => Ok(Admission::Closed),
            Phase::Open { since } => {
                let elapsed = now.duration_since(since);
                if elapsed >= self.cooldown {
                    inner.phase = Phase::HalfOpen { trial_started: now };
                    info!("Circuit breaker half-open, admitting one trial call");
                    Ok(Admission::Trial)
                } else {
                    Err(self.cooldown - elapsed)
                }
            }
            Phase::TrialReady => {
                inner.phase = Phase::HalfOpen { trial_started: now };
                Ok(Admission::Trial)
            }
            Phase::HalfOpen { trial_started } => {
                // A trial whose outcome never arrived (abandoned by a timeout) is replaced
                if now.duration_since(trial_started) >= self.cooldown {
                    inner.phase = Phase::HalfOpen { trial_started: now };
                    Ok(Admission::Trial)
                } else {
                    Err(self.cooldown - now.duration_since(trial_started))
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        if !matches!(inner.phase, Phase::Closed) {
            info!("Circuit breaker closed");
        }
        inner.phase = Phase::Closed;
        inner.consecutive_failures = 0;
    }

    fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let phase = inner.phase;
        match phase {
            Phase::Closed if inner.consecutive_failures >= self.failure_threshold => {
                self.open(&mut inner, now)
            }
            Phase::HalfOpen { .. } | Phase::TrialReady => self.open(&mut inner, now),
            _ => {}
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if matches!(inner.phase, Phase::HalfOpen { .. }) {
            inner.phase = Phase::TrialReady;
            debug!("Half-open trial released unused");
        }
    }

    fn trip(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        if !matches!(inner.phase, Phase::Open { .. }) {
            self.open(&mut inner, now);
        }
    }

    fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let state = match inner.phase {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { since } if since.elapsed() >= self.cooldown => CircuitState::HalfOpen,
            Phase::Open { .. } => CircuitState::Open,
            Phase::TrialReady | Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        };
        BreakerSnapshot {
            state,
            consecutive_failures: inner.consecutive_failures,
        }
    }
}
