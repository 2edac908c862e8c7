use std::time::Duration;

use async_trait::async_trait;
use leasekeeper_core::AppResult;
use leasekeeper_domain::StoreKey;

/// Live lock currently held on one store object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLock {
    /// Token proving the current holder.
    pub token: String,
    /// Identity the lock was acquired under.
    pub holder_id: String,
}

/// Object content together with the lock observed in the same read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Raw object bytes.
    pub content: Vec<u8>,
    /// Live lock, absent when the object is unheld or its lock expired.
    pub lock: Option<StoreLock>,
}

/// Durable object backend with time-bounded per-key locks.
///
/// Implementations classify every failure into the store taxonomy of
/// `AppError` and bound each call with their own timeout.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Returns whether the namespace has been created.
    async fn namespace_exists(&self, namespace: &str) -> AppResult<bool>;

    /// Creates the namespace and returns false when it already existed.
    async fn create_namespace_if_absent(&self, namespace: &str) -> AppResult<bool>;

    /// Returns whether an object exists at `key`.
    async fn exists(&self, key: &StoreKey) -> AppResult<bool>;

    /// Creates an object, failing with `AlreadyExists` when the key is taken.
    async fn create_if_absent(&self, key: &StoreKey, content: &[u8]) -> AppResult<()>;

    /// Reads an object and its live lock, `None` when the key is absent.
    async fn read(&self, key: &StoreKey) -> AppResult<Option<StoredObject>>;

    /// Takes the lock on `key` for `holder_id` and returns the new token.
    ///
    /// Succeeds when the lock is unheld, expired, already held by the same
    /// holder, or currently held under `expected_token`. Fails with
    /// `Conflict` when a different live holder owns it under another token.
    async fn try_acquire_lock(
        &self,
        key: &StoreKey,
        holder_id: &str,
        duration: Duration,
        expected_token: Option<&str>,
    ) -> AppResult<String>;

    /// Extends a held lock, failing with `LockLost` on token mismatch.
    async fn renew_lock(&self, key: &StoreKey, token: &str, duration: Duration) -> AppResult<()>;

    /// Releases a held lock. Succeeds when the lock is already gone.
    async fn release_lock(&self, key: &StoreKey, token: &str) -> AppResult<()>;

    /// Replaces the object content while `token` is the live lock.
    async fn write_conditional(&self, key: &StoreKey, content: &[u8], token: &str)
    -> AppResult<()>;

    /// Deletes the object and any lock on it. Succeeds when absent.
    async fn delete(&self, key: &StoreKey) -> AppResult<()>;
}
