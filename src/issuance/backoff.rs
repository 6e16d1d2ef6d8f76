//! Retry budget and sleep abstraction for the polling loops

use async_trait::async_trait;
use std::time::Duration;

/// Bounded retry policy: at most `max_attempts` calls, waiting
/// `delay(n)` after the n-th failed attempt.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    delay: fn(u32) -> Duration,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, delay: fn(u32) -> Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// `2^n` seconds before retry `n`
    pub fn exponential(max_attempts: u32) -> Self {
        Self::new(max_attempts, exponential_delay)
    }

    pub fn delay_before(&self, attempt: u32) -> Duration {
        (self.delay)(attempt)
    }

    /// Waits the loop will perform if every attempt fails (none after the last)
    pub fn worst_case_wait(&self) -> Duration {
        (1..self.max_attempts).map(|n| self.delay_before(n)).sum()
    }
}

pub fn exponential_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

/// Sleep seam so the polling loops can run without wall-clock waits in tests
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
