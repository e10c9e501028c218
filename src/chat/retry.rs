//! Transport retry with exponential backoff.
//!
//! Enforcement calls (restrict/unrestrict/ban) and user notifications go over
//! a flaky network; transient failures get a short burst of retries (2^n
//! seconds, capped) before the caller decides whether the loss matters.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Maximum retry attempts before giving up.
const MAX_RETRIES: u32 = 4;

/// Maximum backoff between attempts (seconds).
const MAX_BACKOFF_SECS: u64 = 8;

/// Retry an async operation with exponential backoff.
///
/// Backoff: 2^n seconds (1, 2, 4, 8), capped at [`MAX_BACKOFF_SECS`]. Only
/// errors the predicate marks as retryable are retried; others return
/// immediately.
///
/// # Arguments
///
/// * `operation` - The async operation to retry (e.g., `ban_member`)
/// * `is_retryable` - Predicate deciding if an error is transient
///
/// # Returns
///
/// Result of the operation, or the last error after all retries exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    is_retryable: fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !is_retryable(&err) || attempt >= MAX_RETRIES {
                    return Err(err);
                }

                let backoff_secs = 2u64.pow(attempt).min(MAX_BACKOFF_SECS);
                warn!(
                    attempt = attempt + 1,
                    backoff_secs,
                    error = %err,
                    "transient transport failure, retrying"
                );

                sleep(Duration::from_secs(backoff_secs)).await;
                attempt += 1;
            }
        }
    }
}
