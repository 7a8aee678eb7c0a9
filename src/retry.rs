//! Bounded retry
//!
//! ```rust,ignore
//! use aigne_runtime::retry::retry;
//!
//! // One initial attempt plus up to two retries
//! let choice = retry(2, || async { ask_model().await }).await?;
//! ```
//!
//! Retries are immediate. Callers that talk to rate-limited services are
//! expected to put their own delay inside `op`.

use std::future::Future;

use tracing::warn;

use crate::error::AigneError;

/// Run `op`, retrying up to `max_retries` more times on error
///
/// Returns the first success, or the error of the last attempt.
pub async fn retry<F, Fut, T>(max_retries: u32, mut op: F) -> Result<T, AigneError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AigneError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_retries => {
                attempt += 1;
                warn!(attempt, max_retries, error = %err, "Attempt failed, retrying");
            }
            Err(err) => return Err(err),
        }
    }
}
