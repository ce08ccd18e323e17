use std::future::Future;

use anchor_lang::prelude::*;
use tracing::warn;

use crate::config::RetryPolicy;
use crate::errors::is_transient;

/// Runs `f` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are used up. Only `LedgerUnavailable` and
/// `StoreUnavailable` are retried; every step `f` performs must be safe to
/// repeat, which holds for the coordinator's reconciling operations.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(err) if is_transient(&err) && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    op,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if is_transient(&err) {
                    tracing::error!(op, attempts = attempt, error = %err, "giving up after retries");
                }
                return Err(err);
            }
        }
    }
}
