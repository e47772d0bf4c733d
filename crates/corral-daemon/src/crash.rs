//! Crash accounting for automatic restarts.
//!
//! A crash that follows the previous one within the policy window counts as
//! another attempt; a crash after a quieter period starts over at one.
//! Restarts are allowed while the attempt number stays within the budget.

use corral_types::RestartPolicy;

/// What the supervisor should do after a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Spawn a replacement; `attempt` starts at 1.
    Restart { attempt: u32 },
    /// Too many crashes in a row; give up until started by hand.
    Exhausted { attempt: u32 },
    /// The policy allows no automatic restarts.
    Disabled,
}

/// Tracks crash times of one server.
#[derive(Debug, Clone, Default)]
pub struct CrashTracker {
    last_crash_ms: Option<i64>,
    current_attempt: u32,
}

impl CrashTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a crash at `now_ms` (milliseconds since the epoch) and decide.
    pub fn record_crash(&mut self, now_ms: i64, policy: &RestartPolicy) -> RestartDecision {
        let window = i64::try_from(policy.crash_window_ms).unwrap_or(i64::MAX);
        let within_window = self
            .last_crash_ms
            .is_some_and(|last| now_ms.saturating_sub(last) < window);

        self.current_attempt = if within_window {
            self.current_attempt.saturating_add(1)
        } else {
            1
        };
        self.last_crash_ms = Some(now_ms);

        if policy.max_attempts == 0 {
            RestartDecision::Disabled
        } else if self.current_attempt <= policy.max_attempts {
            RestartDecision::Restart {
                attempt: self.current_attempt,
            }
        } else {
            RestartDecision::Exhausted {
                attempt: self.current_attempt,
            }
        }
    }

    /// Attempt number of the most recent crash, zero before any crash.
    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    pub fn last_crash_ms(&self) -> Option<i64> {
        self.last_crash_ms
    }
}
