//! Bounded polling for read-after-write reconciliation.
//!
//! A [`Backoff`] describes when each attempt happens: an initial settle delay
//! before the first attempt, then per-attempt delays taken either from an
//! explicit schedule or from an exponential curve.

use std::{future::Future, time::Duration};

use anyhow::Result;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffDelays {
    /// Delay before attempt `n + 2`. The last entry repeats if attempts
    /// outnumber the schedule.
    Schedule(Vec<Duration>),
    Exponential {
        base: Duration,
        factor: u32,
        max: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub max_attempts: usize,
    pub delays: BackoffDelays,
}

impl Backoff {
    /// One attempt after `initial_delay`, then one more per scheduled delay.
    pub fn schedule(initial_delay: Duration, delays: impl Into<Vec<Duration>>) -> Self {
        let delays = delays.into();
        Self {
            initial_delay,
            max_attempts: delays.len() + 1,
            delays: BackoffDelays::Schedule(delays),
        }
    }

    pub fn exponential(
        initial_delay: Duration,
        base: Duration,
        factor: u32,
        max: Duration,
        max_attempts: usize,
    ) -> Self {
        Self {
            initial_delay,
            max_attempts,
            delays: BackoffDelays::Exponential { base, factor, max },
        }
    }

    /// Waiting for a freshly authorized credential to show up: settle for
    /// 1.5 s, then attempts 1, 2 and 3 seconds apart.
    pub fn reconciliation() -> Self {
        Self::schedule(
            Duration::from_millis(1500),
            [
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(3000),
            ],
        )
    }

    /// Re-checking a platform after a CSRF failure; finishes within 6 s.
    pub fn csrf_reverify() -> Self {
        Self::schedule(
            Duration::from_millis(1000),
            [Duration::from_millis(2000), Duration::from_millis(3000)],
        )
    }

    /// Delay before the given 1-based attempt.
    pub fn delay_before(&self, attempt: usize) -> Duration {
        if attempt <= 1 {
            return self.initial_delay;
        }
        let step = attempt - 2;
        match &self.delays {
            BackoffDelays::Schedule(delays) => delays
                .get(step)
                .or_else(|| delays.last())
                .copied()
                .unwrap_or(Duration::ZERO),
            BackoffDelays::Exponential { base, factor, max } => {
                let exponent = u32::try_from(step).unwrap_or(u32::MAX);
                let multiplier = factor.checked_pow(exponent).unwrap_or(u32::MAX);
                base.checked_mul(multiplier).unwrap_or(*max).min(*max)
            }
        }
    }

    /// Worst-case time spent sleeping across all attempts.
    pub fn total_delay(&self) -> Duration {
        (1..=self.max_attempts).map(|a| self.delay_before(a)).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Satisfied { value: T, attempts: usize },
    /// Every attempt ran without satisfying the predicate. `last` is the most
    /// recent successful fetch, if any.
    Exhausted { last: Option<T>, attempts: usize },
}

impl<T> PollOutcome<T> {
    pub fn attempts(&self) -> usize {
        match self {
            PollOutcome::Satisfied { attempts, .. } | PollOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_satisfied(&self) -> bool {
        matches!(self, PollOutcome::Satisfied { .. })
    }
}

/// Runs `fetch` on the backoff schedule until `done` accepts a value or the
/// attempts run out. Fetch errors count as attempts and are only logged.
pub async fn poll_until<T, F, Fut, P>(
    backoff: &Backoff,
    label: &str,
    mut fetch: F,
    mut done: P,
) -> PollOutcome<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
    P: FnMut(&T) -> bool,
{
    let mut last = None;
    for attempt in 1..=backoff.max_attempts {
        let delay = backoff.delay_before(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        info!(
            label,
            attempt,
            max_attempts = backoff.max_attempts,
            "poll attempt"
        );
        match fetch(attempt).await {
            Ok(value) if done(&value) => {
                info!(label, attempt, "poll satisfied");
                return PollOutcome::Satisfied {
                    value,
                    attempts: attempt,
                };
            }
            Ok(value) => last = Some(value),
            Err(error) => warn!(label, attempt, %error, "poll attempt failed"),
        }
    }

    warn!(
        label,
        max_attempts = backoff.max_attempts,
        "poll exhausted without reaching expected state"
    );
    PollOutcome::Exhausted {
        last,
        attempts: backoff.max_attempts,
    }
}

#[cfg(test)]
#[path = "tests/backoff_tests.rs"]
mod tests;
