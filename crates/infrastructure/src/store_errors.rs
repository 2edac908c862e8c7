//! Classification of driver failures into the store error taxonomy.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use leasekeeper_core::{AppError, AppResult};

/// Default per-call bound on one store round trip.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(120);

/// SQLSTATE codes worth retrying: serialization failure, deadlock, lock not
/// available, too many connections, admin/crash shutdown, cannot connect now.
const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", "40P01", "55P03", "53300", "57P01", "57P02", "57P03",
];

/// Runs one store operation under the adapter's per-call timeout.
pub(crate) async fn bounded<T>(
    timeout: Duration,
    action: &str,
    target: impl Display,
    operation: impl Future<Output = AppResult<T>>,
) -> AppResult<T> {
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Transient(format!(
            "{action} '{target}' timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Maps one Redis client error.
pub(crate) fn classify_redis_error(
    action: &str,
    target: impl Display,
    error: &redis::RedisError,
) -> AppError {
    let message = format!("failed to {action} '{target}': {error}");
    if error.is_timeout()
        || error.is_io_error()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
    {
        return AppError::Transient(message);
    }

    AppError::Fatal(message)
}

/// Maps one sqlx error.
pub(crate) fn classify_sqlx_error(
    action: &str,
    target: impl Display,
    error: &sqlx::Error,
) -> AppError {
    let message = format!("failed to {action} '{target}': {error}");
    match error {
        sqlx::Error::Database(database_error) => {
            let code = database_error.code();
            let code = code.as_deref().unwrap_or_default();
            if code == "23505" {
                AppError::AlreadyExists(message)
            } else if code.starts_with("08") || TRANSIENT_SQLSTATES.contains(&code) {
                AppError::Transient(message)
            } else {
                AppError::Fatal(message)
            }
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => {
            AppError::Transient(message)
        }
        _ => AppError::Fatal(message),
    }
}

/// Converts a lock duration to whole milliseconds, at least one.
pub(crate) fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis())
        .unwrap_or(i64::MAX)
        .max(1)
}
