use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use leasekeeper_application::{DurableStore, StoreLock, StoredObject};
use leasekeeper_core::{AppError, AppResult};
use leasekeeper_domain::StoreKey;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct HeldLock {
    token: String,
    holder_id: String,
    expires_at: Instant,
}

impl HeldLock {
    fn is_live(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

#[derive(Debug)]
struct StoredEntry {
    content: Vec<u8>,
    lock: Option<HeldLock>,
}

impl StoredEntry {
    fn live_lock(&self) -> Option<&HeldLock> {
        self.lock.as_ref().filter(|lock| lock.is_live())
    }

    fn is_locked_with(&self, token: &str) -> bool {
        self.live_lock().is_some_and(|lock| lock.token == token)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    namespaces: HashSet<String>,
    objects: HashMap<StoreKey, StoredEntry>,
}

/// Process-local durable store for single-host runs and tests.
///
/// Lock expiry follows the tokio clock, so paused-time tests can advance
/// past a lease duration without sleeping.
#[derive(Debug, Default)]
pub struct InMemoryDurableStore {
    state: RwLock<StoreState>,
}

impl InMemoryDurableStore {
    /// Creates an empty store with no namespaces.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn expiry_after(duration: Duration) -> AppResult<Instant> {
    if duration.is_zero() {
        return Err(AppError::Validation(
            "lock duration must be greater than zero".to_owned(),
        ));
    }

    let now = Instant::now();
    Ok(now.checked_add(duration).unwrap_or(now))
}

fn lock_lost(key: &StoreKey, token: &str) -> AppError {
    AppError::LockLost(format!("'{key}' is no longer locked with token '{token}'"))
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn namespace_exists(&self, namespace: &str) -> AppResult<bool> {
        Ok(self.state.read().await.namespaces.contains(namespace))
    }

    async fn create_namespace_if_absent(&self, namespace: &str) -> AppResult<bool> {
        if namespace.trim().is_empty() {
            return Err(AppError::Validation(
                "store namespace must not be empty".to_owned(),
            ));
        }

        Ok(self
            .state
            .write()
            .await
            .namespaces
            .insert(namespace.to_owned()))
    }

    async fn exists(&self, key: &StoreKey) -> AppResult<bool> {
        Ok(self.state.read().await.objects.contains_key(key))
    }

    async fn create_if_absent(&self, key: &StoreKey, content: &[u8]) -> AppResult<()> {
        let mut state = self.state.write().await;
        if !state.namespaces.contains(key.namespace()) {
            return Err(AppError::Fatal(format!(
                "namespace '{}' does not exist",
                key.namespace()
            )));
        }

        if state.objects.contains_key(key) {
            return Err(AppError::AlreadyExists(format!("'{key}' already exists")));
        }

        state.objects.insert(
            key.clone(),
            StoredEntry {
                content: content.to_vec(),
                lock: None,
            },
        );
        Ok(())
    }

    async fn read(&self, key: &StoreKey) -> AppResult<Option<StoredObject>> {
        let state = self.state.read().await;
        Ok(state.objects.get(key).map(|entry| StoredObject {
            content: entry.content.clone(),
            lock: entry.live_lock().map(|lock| StoreLock {
                token: lock.token.clone(),
                holder_id: lock.holder_id.clone(),
            }),
        }))
    }

    async fn try_acquire_lock(
        &self,
        key: &StoreKey,
        holder_id: &str,
        duration: Duration,
        expected_token: Option<&str>,
    ) -> AppResult<String> {
        let expires_at = expiry_after(duration)?;
        let mut state = self.state.write().await;
        let entry = state
            .objects
            .get_mut(key)
            .ok_or_else(|| AppError::Fatal(format!("no object stored at '{key}'")))?;

        if let Some(current) = entry.live_lock()
            && current.holder_id != holder_id
            && expected_token != Some(current.token.as_str())
        {
            return Err(AppError::Conflict(format!(
                "'{key}' is locked by '{}'",
                current.holder_id
            )));
        }

        let token = format!("{holder_id}:{}", uuid::Uuid::new_v4());
        entry.lock = Some(HeldLock {
            token: token.clone(),
            holder_id: holder_id.to_owned(),
            expires_at,
        });
        Ok(token)
    }

    async fn renew_lock(&self, key: &StoreKey, token: &str, duration: Duration) -> AppResult<()> {
        let expires_at = expiry_after(duration)?;
        let mut state = self.state.write().await;
        match state.objects.get_mut(key) {
            Some(entry) if entry.is_locked_with(token) => {
                if let Some(lock) = entry.lock.as_mut() {
                    lock.expires_at = expires_at;
                }
                Ok(())
            }
            _ => Err(lock_lost(key, token)),
        }
    }

    async fn release_lock(&self, key: &StoreKey, token: &str) -> AppResult<()> {
        let mut state = self.state.write().await;
        if let Some(entry) = state.objects.get_mut(key)
            && entry.lock.as_ref().is_some_and(|lock| lock.token == token)
        {
            entry.lock = None;
        }

        Ok(())
    }

    async fn write_conditional(
        &self,
        key: &StoreKey,
        content: &[u8],
        token: &str,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        match state.objects.get_mut(key) {
            Some(entry) if entry.is_locked_with(token) => {
                entry.content = content.to_vec();
                Ok(())
            }
            _ => Err(lock_lost(key, token)),
        }
    }

    async fn delete(&self, key: &StoreKey) -> AppResult<()> {
        self.state.write().await.objects.remove(key);
        Ok(())
    }
}
