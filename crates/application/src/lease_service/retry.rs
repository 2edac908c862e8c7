use std::future::Future;

use leasekeeper_core::AppResult;

use super::config::RetryPolicy;

/// Runs `call` until it succeeds, fails with a non-transient error, or the
/// policy runs out of attempts.
pub(crate) async fn retry_transient<T, F, Fut>(policy: RetryPolicy, mut call: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Err(error) if error.is_transient() && attempt < policy.max_attempts() => {
                tokio::time::sleep(policy.backoff_for(attempt)).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
