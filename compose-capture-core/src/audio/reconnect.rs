use std::time::{Duration, Instant};

use crate::models::config::ReconnectPolicy;

/// Delay schedule for audio reconnect attempts.
///
/// Lives as long as the capture it belongs to, so a device that keeps
/// dropping out escalates through the bands instead of restarting at the
/// fastest delay on every loss.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    policy: ReconnectPolicy,
    attempts: u32,
    last_attempt: Option<Instant>,
}

impl ReconnectBackoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            last_attempt: None,
        }
    }

    /// Attempts made since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Register an attempt at `now` and return how long to wait before it.
    pub fn next_delay(&mut self, now: Instant) -> Duration {
        let quiet = Duration::from_millis(self.policy.quiet_period_ms);
        if self.last_attempt.is_some_and(|last| now.saturating_duration_since(last) >= quiet) {
            self.attempts = 0;
        }
        let delay = self.delay_for(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt = Some(now);
        delay
    }

    /// Start over at the first band.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_attempt = None;
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let mut remaining = attempt;
        for band in &self.policy.bands {
            if remaining < band.attempts {
                return Duration::from_millis(band.delay_ms.min(self.policy.max_delay_ms));
            }
            remaining -= band.attempts;
        }
        Duration::from_millis(self.policy.max_delay_ms)
    }
}
