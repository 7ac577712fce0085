//! Bounded retry for transient provider failures.
//!
//! Adapters wrap their connection/request setup in [`with_retry`]: at most
//! three attempts, exponential backoff capped at 250 ms. Only errors
//! classified transient are retried; fatal errors (auth, permanent provider
//! failure) surface immediately.

use std::future::Future;
use std::time::Duration;

use vx_domain::error::Result;

/// Maximum attempts per operation (initial try included).
pub const MAX_ATTEMPTS: u32 = 3;

/// Backoff cap between attempts.
pub const BACKOFF_CAP: Duration = Duration::from_millis(250);

const BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Run `op` with the adapter retry budget.
pub async fn with_retry<T, F, Fut>(op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                let backoff = BACKOFF_BASE * 2u32.pow(attempt - 1);
                let backoff = backoff.min(BACKOFF_CAP);
                tracing::debug!(
                    op = op_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "transient provider error, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => {
                if attempt > 1 {
                    tracing::warn!(
                        op = op_name,
                        attempts = attempt,
                        error = %err,
                        "retry budget exhausted"
                    );
                }
                return Err(err);
            }
        }
    }
}
