//! Retry decisions
//!
//! Every retry loop in the pipeline (LLM requests, source fetches, store
//! writes) asks the same pure function what to do next. Keeping the decision
//! free of I/O makes the policy testable without a network.

use std::time::Duration;

/// Classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The remote side asked us to slow down (HTTP 429)
    RateLimited,
    /// Network error, timeout or 5xx; the same request may succeed later
    Transient,
    /// Malformed request, rejected content, bad credentials
    Permanent,
}

/// What the caller should do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Sleep for `delay`, then try the same target again
    RetrySame { delay: Duration },
    /// Move on to the next target (credential)
    AdvanceNext,
    /// Nothing left to try
    Fail,
}

/// Bounded exponential backoff policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum retries of the same target after a transient failure
    pub max_transient_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_transient_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that never sleeps, for tests and dry runs
    pub fn immediate(max_transient_retries: u32) -> Self {
        Self {
            max_transient_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Decides the next step.
    ///
    /// `attempt` is the number of attempts already made against the current
    /// target (1 after the first failure). `has_next` tells whether another
    /// target exists to advance to.
    pub fn decide(&self, attempt: u32, kind: FailureKind, has_next: bool) -> RetryAction {
        let exhausted = || {
            if has_next {
                RetryAction::AdvanceNext
            } else {
                RetryAction::Fail
            }
        };

        match kind {
            FailureKind::Transient if attempt <= self.max_transient_retries => {
                RetryAction::RetrySame {
                    delay: self.backoff_delay(attempt),
                }
            }
            FailureKind::Transient | FailureKind::RateLimited | FailureKind::Permanent => {
                exhausted()
            }
        }
    }

    /// Un-jittered delay before retry number `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// Applies a random factor between 0.5 and 1.5 to a delay
pub fn with_jitter(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let jitter = 0.5 + rand::random::<f64>();
    Duration::from_secs_f64(delay.as_secs_f64() * jitter)
}
