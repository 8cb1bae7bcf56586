//! # Reconnection Scheduler
//!
//! Explicit backoff state machine replacing nested timer callbacks. The
//! scheduler decides *whether* and *after how long* the next attempt runs
//! and whether it should downgrade to the progressive strategy; the
//! controller executes the teardown/rebuild the decision describes. Keeping
//! the decision pure makes the retry ladder testable without a transport.
//!
//! The attempt counter resets only on confirmed resumption of data flow;
//! a transport that opens and then goes silent still climbs the ladder.

use crate::config::ReconnectPolicy;
use rand::Rng;
use std::time::Duration;

/// Decision for one failure event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Run attempt `attempt` (1-based) after `delay`.
    Retry {
        attempt: u32,
        delay: Duration,
        /// Push strategies should fall back to the progressive strategy.
        downgrade: bool,
    },
    /// The ladder is exhausted; the session fails terminally.
    GiveUp,
}

/// Exponential-backoff retry ladder.
pub struct ReconnectionScheduler {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectionScheduler {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Attempts consumed since the last confirmed recovery.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    /// Decide the response to a failure. Each `Retry` consumes one attempt.
    pub fn next_attempt(&mut self) -> ReconnectDecision {
        if self.attempts >= self.policy.max_attempts {
            return ReconnectDecision::GiveUp;
        }

        self.attempts += 1;
        let jitter_ms = self.policy.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };

        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay: self.bounded_delay(self.attempts) + jitter,
            downgrade: self.attempts >= self.policy.downgrade_after,
        }
    }

    /// Reset the ladder. Called only when audio flow is confirmed after a
    /// reconnect, never on mere transport open.
    pub fn mark_recovered(&mut self) {
        self.attempts = 0;
    }

    /// Deterministic (jitter-free) delay for the given 1-based attempt.
    fn bounded_delay(&self, attempt: u32) -> Duration {
        let factor = self.policy.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let raw = self.policy.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(raw.min(self.policy.max_delay.as_secs_f64()))
    }
}
