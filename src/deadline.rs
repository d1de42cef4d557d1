use std::time::Duration;

use crate::error::{Error, Result};

/// Run a blocking store call on the blocking pool, failing with
/// [`Error::Timeout`] if it does not finish within `after`.
///
/// The closure keeps running to completion after a timeout; only the
/// caller stops waiting for it.
pub async fn run_blocking<T, F>(
    operation: &'static str,
    after: Duration,
    f: F,
) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(f);
    match tokio::time::timeout(after, task).await {
        Ok(joined) => joined?,
        Err(_) => {
            tracing::warn!(operation, ?after, "store call timed out");
            Err(Error::Timeout { operation, after })
        }
    }
}
