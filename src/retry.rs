// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Publish Retry Pipeline
//!
//! Runs one logical publish up to `max_attempts` times. Only failures whose
//! `FailureKind` is retryable are attempted again; between attempts the
//! pipeline sleeps for an exponentially growing, jittered delay. Cancellation
//! is observed while an attempt runs and while sleeping.

use crate::errors::{AmqpError, PublishError};
use rand::Rng;
use std::{future::Future, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// State of one publish call's retry loop.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    /// 1-based number of the attempt in flight.
    pub attempt: u32,
    /// Delay slept before the current attempt.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Creates a retry policy.
    ///
    /// # Parameters
    /// * `max_attempts` - Total attempts per publish, a zero is raised to one
    /// * `base_delay` - Backoff after the first failed attempt
    /// * `max_delay` - Upper bound of any backoff, never below `base_delay`
    ///
    /// # Returns
    /// A new retry policy
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> RetryPolicy {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Total number of attempts one publish may make.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff after the first failed attempt.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Cap applied to every backoff.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Capped exponential backoff after the failed attempt `attempt`
    /// (1-based): `base * 2^(attempt - 1)`, never above `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Applies equal jitter to the backoff: `factor` is clamped to `[0, 1]`
    /// and selects a point in `[backoff / 2, backoff]`.
    pub fn jittered(&self, attempt: u32, factor: f64) -> Duration {
        let backoff = self.backoff(attempt);
        let half = backoff / 2;
        half + (backoff - half).mul_f64(factor.clamp(0.0, 1.0))
    }

    /// Randomized delay to sleep after the failed attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.jittered(attempt, rand::rng().random_range(0.0..=1.0))
    }

    /// Drives `op` until it succeeds, fails permanently, runs out of attempts
    /// or `cancel` fires. An attempt in flight is dropped on cancellation.
    ///
    /// # Parameters
    /// * `cancel` - Token stopping the loop with `PublishError::Cancelled`
    /// * `op` - One attempt, receiving the 1-based attempt number
    ///
    /// # Returns
    /// The value of the first successful attempt, or the classified failure
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T, PublishError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AmqpError>>,
    {
        let mut ctx = RetryContext {
            attempt: 1,
            ..Default::default()
        };

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PublishError::Cancelled),
                result = op(ctx.attempt) => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(PublishError::Permanent(err));
            }

            if ctx.attempt >= self.max_attempts {
                return Err(PublishError::Exhausted {
                    attempts: ctx.attempt,
                    source: err,
                });
            }

            ctx.delay = self.delay(ctx.attempt);
            warn!(
                attempt = ctx.attempt,
                max_attempts = self.max_attempts,
                delay_ms = ctx.delay.as_millis() as u64,
                error = err.to_string(),
                "publish attempt failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PublishError::Cancelled),
                _ = tokio::time::sleep(ctx.delay) => {}
            }

            ctx.attempt += 1;
        }
    }
}
