//! Shared primitives for all Rust crates in Leasekeeper.

#![forbid(unsafe_code)]

/// Worker identity shared across services.
pub mod host;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use host::HostIdentity;

/// Result type used across Leasekeeper crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Common error categories.
///
/// Every durable store failure maps to exactly one of `AlreadyExists`,
/// `Conflict`, `LockLost`, `Transient` or `Fatal`. `Validation` is reserved
/// for caller input rejected before the store is contacted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Create path found the key already present.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Lock contention lost to a concurrent acquirer.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The presented lock token is no longer valid (expired or stolen).
    #[error("lock lost: {0}")]
    LockLost(String),

    /// Network, throttling or timeout failure that may succeed on retry.
    #[error("transient store error: {0}")]
    Transient(String),

    /// Malformed data, authorization failure or other unrecoverable condition.
    #[error("fatal store error: {0}")]
    Fatal(String),
}

impl AppError {
    /// Returns true when the failure is eligible for bounded retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns true when the caller no longer owns the partition.
    #[must_use]
    pub fn is_ownership_lost(&self) -> bool {
        matches!(self, Self::LockLost(_))
    }

    /// Returns true when another holder won an acquisition race.
    #[must_use]
    pub fn is_lost_race(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns a stable label for structured logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::AlreadyExists(_) => "already_exists",
            Self::Conflict(_) => "conflict",
            Self::LockLost(_) => "lock_lost",
            Self::Transient(_) => "transient",
            Self::Fatal(_) => "fatal",
        }
    }
}
