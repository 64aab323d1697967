//! Bounded retry with fixed or exponential backoff.

use std::future::Future;
use std::time::Duration;

use super::sink::SinkError;

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failure.
    Fixed,
    /// Delay doubles after every failure.
    Exponential,
}

/// Retry schedule for one export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Growth of the delay.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Constant delay between attempts.
    #[must_use]
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Delay doubling after every failure.
    #[must_use]
    pub const fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Exponential,
        }
    }

    /// Priority lane schedule: two attempts one second apart.
    #[must_use]
    pub const fn priority_lane() -> Self {
        Self::fixed(2, Duration::from_secs(1))
    }

    /// Normal lane schedule: three attempts with doubling delay.
    #[must_use]
    pub const fn batch_lane(base_delay: Duration) -> Self {
        Self::exponential(3, base_delay)
    }

    /// Delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        }
    }

    /// Runs `operation` until it succeeds or the attempts are used up.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    pub async fn run<F, Fut>(&self, mut operation: F) -> Result<(), SinkError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), SinkError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(()) => return Ok(()),
                Err(error) if attempt >= attempts => return Err(error),
                Err(error) => {
                    let delay = self.delay_after(attempt);
                    tracing::debug!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        %error,
                        "Export attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
