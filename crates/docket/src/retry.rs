//! Resilient wrapper for store-touching operations.
//!
//! Transient failures (connection loss, serialization conflicts) are
//! retried with exponential backoff plus random jitter; the explicit
//! `rollback` hook runs before every retry so an operation holding an
//! open transaction can abort it first. Operations that are internally
//! atomic pass [`no_rollback`]. Non-transient failures propagate
//! immediately, and exhausting the attempts re-raises the last error;
//! this boundary never turns a failure into a silent empty result.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use docket_core::error::StoreError;

use crate::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: u32,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2,
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            backoff_factor: 2,
            max_jitter: Duration::from_millis(config.max_jitter_ms),
        }
    }
}

/// Rollback hook for operations with nothing to roll back.
pub fn no_rollback() -> impl Future<Output = ()> {
    std::future::ready(())
}

/// Run `op`, retrying transient [`StoreError`]s up to
/// `policy.attempts` times total, calling `rollback` before each retry.
pub async fn with_retries<T, Op, OpFut, Rb, RbFut>(
    policy: &RetryPolicy,
    label: &str,
    mut rollback: Rb,
    mut op: Op,
) -> Result<T, StoreError>
where
    Op: FnMut() -> OpFut,
    OpFut: Future<Output = Result<T, StoreError>>,
    Rb: FnMut() -> RbFut,
    RbFut: Future<Output = ()>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < attempts => {
                attempt += 1;
                warn!(
                    operation = label,
                    attempt,
                    error = %err,
                    "transient store failure, rolling back and retrying"
                );
                rollback().await;
                tokio::time::sleep(backoff_delay(policy, attempt - 1)).await;
            }
            Err(err) => {
                if err.is_transient() {
                    warn!(
                        operation = label,
                        attempts,
                        error = %err,
                        "store operation failed after retries"
                    );
                }
                return Err(err);
            }
        }
    }
}

/// Exponential backoff with random jitter: `base · factor^exponent`
/// plus up to `max_jitter`.
fn backoff_delay(policy: &RetryPolicy, exponent: u32) -> Duration {
    let backoff = policy
        .base_delay
        .saturating_mul(policy.backoff_factor.saturating_pow(exponent));
    let jitter_ms = policy.max_jitter.as_millis() as u64;
    if jitter_ms == 0 {
        backoff
    } else {
        backoff + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}
