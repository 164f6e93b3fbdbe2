//! Database retry logic
//!
//! Persistence writes get exactly one retry. Errors that cannot succeed on a
//! second attempt (missing rows, invalid input) are returned at once.

use std::future::Future;
use std::time::Duration;
use mps_common::Result;

/// Run `operation`, retrying once after `delay` if the first error is retryable
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "increment_scanned")
/// * `delay` - Pause before the second attempt
/// * `operation` - Closure producing the database future; called at most twice
pub async fn retry_once<F, Fut, T>(operation_name: &str, delay: Duration, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let err = match operation().await {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    if !err.is_retryable() {
        return Err(err);
    }

    tracing::warn!(
        operation = operation_name,
        error = %err,
        retry_in_ms = delay.as_millis() as u64,
        "Database operation failed, retrying once"
    );
    tokio::time::sleep(delay).await;

    match operation().await {
        Ok(value) => {
            tracing::debug!(operation = operation_name, "Database operation succeeded on retry");
            Ok(value)
        }
        Err(second) => {
            tracing::error!(
                operation = operation_name,
                first_error = %err,
                error = %second,
                "Database operation failed after retry"
            );
            Err(second)
        }
    }
}
