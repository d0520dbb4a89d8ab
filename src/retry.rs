//! Retry with exponential backoff and jitter.
//!
//! [`BackoffPolicy`] is the single delay scheme used by both the per-panel
//! retry loop and the generic [`with_retry`] helper. Jitter spreads retries
//! from panels generated in parallel so they do not land on a provider at
//! the same instant.

use crate::error::GenerationError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Default number of attempts for the generic helper and for each panel.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay configuration for retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first retry (attempt index 0).
    pub base_delay_ms: u64,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Upper bound applied after jitter.
    pub max_delay_ms: u64,
    /// Maximum jitter as a fraction of the un-jittered delay (0.0 disables).
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter_ratio: 0.3,
        }
    }
}

impl BackoffPolicy {
    /// A policy that never waits. Useful for tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
            jitter_ratio: 0.0,
        }
    }

    /// Un-jittered delay for a zero-based attempt index.
    pub fn base_delay_for(&self, attempt: u32) -> f64 {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        self.base_delay_ms as f64 * self.multiplier.powi(exponent)
    }

    /// `min(base * multiplier^attempt + jitter, cap)` with jitter drawn
    /// uniformly from `[0, jitter_ratio * delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        let jitter = if self.jitter_ratio > 0.0 && delay > 0.0 {
            rand::rng().random::<f64>() * self.jitter_ratio * delay
        } else {
            0.0
        };
        let capped = (delay + jitter).min(self.max_delay_ms as f64);
        if capped.is_finite() && capped > 0.0 {
            Duration::from_millis(capped as u64)
        } else {
            Duration::ZERO
        }
    }
}

/// Runs `f` until it succeeds, the failure is not retryable, or
/// `max_attempts` is exhausted. Every failure is logged with the operation
/// name and attempt number.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    max_attempts: u32,
    policy: &BackoffPolicy,
    mut f: F,
) -> Result<T, GenerationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts,
                    category = %err.category,
                    severity = %err.severity,
                    error = %err,
                    "Operation failed"
                );
                if attempt + 1 < max_attempts && err.retryable {
                    let delay = policy.delay_for_attempt(attempt);
                    debug!(operation, delay_ms = delay.as_millis() as u64, "Retrying after backoff");
                    sleep(delay).await;
                    attempt += 1;
                } else {
                    return Err(err);
                }
            }
        }
    }
}

/// Fails with a TIMEOUT error when `fut` does not finish within `limit`.
pub async fn with_timeout<T, Fut>(
    operation: &str,
    limit: Duration,
    fut: Fut,
) -> Result<T, GenerationError>
where
    Fut: Future<Output = Result<T, GenerationError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(GenerationError::timeout(operation, limit)),
    }
}
