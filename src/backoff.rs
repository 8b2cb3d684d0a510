//! The one poll loop used for confirmation and for read-after-write.

use std::{future::Future, time::Duration};

use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::config::{PollPolicy, ReadBackPolicy};

/// Non-decreasing delay schedule: `initial`, `initial * m`, ... capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            next: initial.min(max),
            max,
            multiplier: multiplier.max(1.0),
        }
    }

    pub fn constant(interval: Duration) -> Self {
        Self::new(interval, interval, 1.0)
    }
}

impl From<PollPolicy> for Backoff {
    fn from(policy: PollPolicy) -> Self {
        Self::new(policy.initial_interval, policy.max_interval, policy.multiplier)
    }
}

impl From<ReadBackPolicy> for Backoff {
    fn from(policy: ReadBackPolicy) -> Self {
        Self::constant(policy.interval)
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        // an overflowing or non-finite step saturates at the cap
        self.next = Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .map_or(self.max, |next| next.min(self.max));
        Some(current)
    }
}

/// When to stop polling. Built only through the constructors, so at least
/// one bound is always present.
#[derive(Debug, Clone, Copy)]
pub struct PollLimit {
    deadline: Option<Instant>,
    max_attempts: Option<u32>,
}

impl PollLimit {
    /// Stops at whichever of `timeout` or `max_attempts` comes first.
    pub fn timeout_or_attempts(timeout: Duration, max_attempts: u32) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            max_attempts: Some(max_attempts),
        }
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            max_attempts: None,
        }
    }

    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            deadline: None,
            max_attempts: Some(max_attempts),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    Exhausted { attempts: u32 },
}

/// Sleeps one backoff step, then probes; repeats until the probe yields a
/// value or the limit is hit. The final sleep is clipped to the deadline so
/// the last probe lands on it rather than past it.
///
/// Dropping the returned future abandons the loop; probes must therefore be
/// side-effect free.
pub async fn poll<T, F, Fut>(schedule: Backoff, limit: PollLimit, mut probe: F) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let mut attempts = 0u32;
    for delay in schedule {
        if limit.max_attempts.is_some_and(|max| attempts >= max) {
            break;
        }
        let delay = match limit.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                delay.min(remaining)
            }
            None => delay,
        };
        sleep(delay).await;
        attempts += 1;
        debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, "poll attempt");
        if let Some(value) = probe(attempts).await {
            return PollOutcome::Ready(value);
        }
    }
    PollOutcome::Exhausted { attempts }
}
