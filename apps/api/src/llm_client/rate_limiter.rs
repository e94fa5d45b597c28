use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Admission control shared by every pipeline run in the process.
pub trait Throttle: Send + Sync {
    /// Claims a slot if one is free. Never blocks.
    fn acquire(&self) -> bool;
    /// How long until the next slot frees up; zero when one is free now.
    fn wait_time(&self) -> Duration;
    /// Requests admitted within the current window.
    fn in_window(&self) -> usize;
    fn capacity(&self) -> usize;
}

/// Sliding-window limiter: at most `max_requests` admissions in any rolling `window`.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            admitted: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    fn prune(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = admitted.front() {
            if now.duration_since(oldest) >= self.window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Throttle for SlidingWindowLimiter {
    fn acquire(&self) -> bool {
        let now = Instant::now();
        let mut admitted = self.admitted.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut admitted, now);
        if admitted.len() < self.max_requests {
            admitted.push_back(now);
            true
        } else {
            false
        }
    }

    fn wait_time(&self) -> Duration {
        let now = Instant::now();
        let mut admitted = self.admitted.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut admitted, now);
        if admitted.len() < self.max_requests {
            return Duration::ZERO;
        }
        admitted
            .front()
            .map(|&oldest| (oldest + self.window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    fn in_window(&self) -> usize {
        let now = Instant::now();
        let mut admitted = self.admitted.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut admitted, now);
        admitted.len()
    }

    fn capacity(&self) -> usize {
        self.max_requests
    }
}
