use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded exponential backoff for container recovery.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Recovery attempts allowed before the container is failed.
    pub max_attempts: u16,
    /// Delay before the first recovery attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_backoff_ms: 60_000,
        }
    }
}

/// What to do after an inconclusive poll.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecoveryDecision {
    /// Wait `delay`, then make recovery attempt number `attempt`.
    Retry { attempt: u16, delay: Duration },
    /// The budget is spent; fail the container.
    Escalate,
}

impl RetryPolicy {
    pub fn new(max_attempts: u16, base_delay_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_backoff_ms,
        }
    }

    /// A policy that retries immediately; for tests and tight loops.
    pub fn immediate(max_attempts: u16) -> Self {
        Self::new(max_attempts, 0, 0)
    }

    /// Delay before recovery attempt `attempt` (1-based):
    /// `min(base_delay * 2^(attempt - 1), max_backoff)`.
    pub fn compute_backoff(&self, attempt: u16) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exp = u32::from(attempt.saturating_sub(1)).min(63);
        let scaled = self
            .base_delay_ms
            .checked_mul(1u64 << exp)
            .unwrap_or(u64::MAX);
        Duration::from_millis(scaled.min(self.max_backoff_ms))
    }

    /// Whether `attempts` completed recoveries exhaust the budget.
    pub fn should_escalate(&self, attempts: u16) -> bool {
        attempts >= self.max_attempts
    }

    /// Decide the next step given the recoveries already attempted.
    pub fn decide(&self, attempts_made: u16) -> RecoveryDecision {
        if self.should_escalate(attempts_made) {
            RecoveryDecision::Escalate
        } else {
            let attempt = attempts_made.saturating_add(1);
            RecoveryDecision::Retry {
                attempt,
                delay: self.compute_backoff(attempt),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_backoff_exponential() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.compute_backoff(0), Duration::ZERO);
        assert_eq!(policy.compute_backoff(1).as_millis() as u64, policy.base_delay_ms);
        assert_eq!(policy.compute_backoff(2).as_millis() as u64, policy.base_delay_ms * 2);
        assert_eq!(policy.compute_backoff(3).as_millis() as u64, policy.base_delay_ms * 4);
    }

    #[test]
    fn test_backoff_capped() {
        let policy = RetryPolicy::new(10, 1_000, 5_000);
        assert_eq!(policy.compute_backoff(10), Duration::from_millis(5_000));
        assert_eq!(policy.compute_backoff(u16::MAX), Duration::from_millis(5_000));
    }

    #[test]
    fn test_should_escalate() {
        assert!(!RetryPolicy::immediate(3).should_escalate(0));
        assert!(!RetryPolicy::immediate(3).should_escalate(2));
        assert!(RetryPolicy::immediate(3).should_escalate(3));
        assert!(RetryPolicy::immediate(0).should_escalate(0));
    }

    #[test]
    fn test_decide_retry_then_escalate() {
        let policy = RetryPolicy::new(2, 100, 10_000);
        assert_eq!(
            policy.decide(0),
            RecoveryDecision::Retry {
                attempt: 1,
                delay: Duration::from_millis(100),
            }
        );
        assert_eq!(
            policy.decide(1),
            RecoveryDecision::Retry {
                attempt: 2,
                delay: Duration::from_millis(200),
            }
        );
        assert_eq!(policy.decide(2), RecoveryDecision::Escalate);
    }
}
