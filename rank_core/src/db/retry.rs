//! Retry wrapper for transient database failures.
//!
//! Batch runs wrap their store round-trips in this so a blip on the
//! connection does not abort a whole import; non-transient errors surface
//! immediately. Callers label the operation so retry noise in the logs is
//! attributable.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const BASE_BACKOFF_MS: u64 = 100;

/// Execute a labeled database operation with exponential backoff on
/// transient failures. Constraint violations and other application errors
/// are never retried.
pub async fn execute_with_retry<F, Fut, T>(op: &str, mut f: F, max_attempts: u32) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_attempts && is_retriable_error(&e) => {
                let backoff_ms = BASE_BACKOFF_MS * 2_u64.pow(attempt - 1);
                warn!(
                    op,
                    attempt,
                    max_attempts,
                    backoff_ms,
                    error = %e,
                    "transient store failure, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_retriable_error(e: &anyhow::Error) -> bool {
    let err_str = e.to_string().to_lowercase();

    err_str.contains("connection")
        || err_str.contains("timeout")
        || err_str.contains("broken pipe")
        || err_str.contains("deadlock detected")
        || err_str.contains("could not serialize")
        || err_str.contains("too many clients")
}
