//! Poll strategies for awaiting update-call completion.

use std::time::Duration;

/// Schedules the delays between certificate polls during
/// [`commit`](crate::agent::PreparedCall::commit). Returning `None` ends the
/// poll loop and surfaces a timeout.
pub trait PollStrategy: Send + Sync {
    /// Delay before poll attempt `attempt` (0-based), or `None` when the
    /// budget is exhausted.
    fn delay(&self, attempt: u32) -> Option<Duration>;
}

/// Exponential backoff with an attempt ceiling and a delay cap.
#[derive(Debug, Clone)]
pub struct ExponentialPoll {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for ExponentialPoll {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(2),
        }
    }
}

impl PollStrategy for ExponentialPoll {
    fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = self.multiplier.powi(attempt.min(24) as i32);
        let delay = self.base_delay.mul_f64(factor);
        Some(delay.min(self.max_delay))
    }
}
