use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use leasekeeper_core::{AppError, AppResult, HostIdentity};
use leasekeeper_domain::{Lease, LeaseKey, StoreKey};
use tokio::sync::Mutex;

use crate::{
    DurableStore, LeaseHost, LeaseManager, LeaseManagerConfig, PartitionManager, RetryPolicy,
    StoreLock, StoredObject,
};

pub(crate) const SOURCE_PATH: &str = "telemetry";
pub(crate) const CONSUMER_GROUP: &str = "$Default";

#[derive(Default)]
struct FakeObject {
    content: Vec<u8>,
    lock: Option<StoreLock>,
}

#[derive(Default)]
struct FakeState {
    namespaces: HashSet<String>,
    objects: HashMap<StoreKey, FakeObject>,
    injected_failures: VecDeque<Option<AppError>>,
    rewrites_before_acquire: HashMap<StoreKey, Vec<u8>>,
    poisoned_reads: HashMap<StoreKey, AppError>,
    acquire_attempts: usize,
    issued_tokens: u64,
}

/// Store double whose locks only expire when a test says so.
#[derive(Default)]
pub(crate) struct FakeDurableStore {
    state: Mutex<FakeState>,
}

impl FakeDurableStore {
    pub(crate) async fn expire_lock(&self, key: &StoreKey) {
        if let Some(object) = self.state.lock().await.objects.get_mut(key) {
            object.lock = None;
        }
    }

    pub(crate) async fn fail_next(&self, error: AppError) {
        self.state
            .lock()
            .await
            .injected_failures
            .push_back(Some(error));
    }

    /// Lets `calls` store calls succeed before the next injected failure.
    pub(crate) async fn pass_next(&self, calls: usize) {
        let mut state = self.state.lock().await;
        state
            .injected_failures
            .extend(std::iter::repeat_with(|| None).take(calls));
    }

    /// Replaces the stored record right before the next lock grant on `key`,
    /// as if another host had owned and released it in between.
    pub(crate) async fn rewrite_before_acquire(&self, lease: &Lease) {
        let content = lease.to_json_bytes().unwrap_or_else(|_| unreachable!());
        self.state
            .lock()
            .await
            .rewrites_before_acquire
            .insert(lease.store_key(), content);
    }

    pub(crate) async fn lock_holder(&self, key: &StoreKey) -> Option<String> {
        let state = self.state.lock().await;
        state
            .objects
            .get(key)
            .and_then(|object| object.lock.as_ref())
            .map(|lock| lock.holder_id.clone())
    }

    pub(crate) async fn poison_reads(&self, key: StoreKey, error: AppError) {
        self.state.lock().await.poisoned_reads.insert(key, error);
    }

    pub(crate) async fn acquire_attempts(&self) -> usize {
        self.state.lock().await.acquire_attempts
    }

    pub(crate) async fn stored_lease(&self, partition_id: &str) -> Option<Lease> {
        let key = partition_key(partition_id);
        let state = self.state.lock().await;
        state
            .objects
            .get(&key.store_key())
            .and_then(|object| Lease::from_json_bytes(&object.content, &key).ok())
    }

    fn take_injected(state: &mut FakeState) -> AppResult<()> {
        match state.injected_failures.pop_front() {
            Some(Some(error)) => Err(error),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl DurableStore for FakeDurableStore {
    async fn namespace_exists(&self, namespace: &str) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        Self::take_injected(&mut state)?;
        Ok(state.namespaces.contains(namespace))
    }

    async fn create_namespace_if_absent(&self, namespace: &str) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        Self::take_injected(&mut state)?;
        Ok(state.namespaces.insert(namespace.to_owned()))
    }

    async fn exists(&self, key: &StoreKey) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        Self::take_injected(&mut state)?;
        Ok(state.objects.contains_key(key))
    }

    async fn create_if_absent(&self, key: &StoreKey, content: &[u8]) -> AppResult<()> {
        let mut state = self.state.lock().await;
        Self::take_injected(&mut state)?;
        if state.objects.contains_key(key) {
            return Err(AppError::AlreadyExists(key.to_string()));
        }

        state.objects.insert(
            key.clone(),
            FakeObject {
                content: content.to_vec(),
                lock: None,
            },
        );
        Ok(())
    }

    async fn read(&self, key: &StoreKey) -> AppResult<Option<StoredObject>> {
        let mut state = self.state.lock().await;
        Self::take_injected(&mut state)?;
        if let Some(error) = state.poisoned_reads.get(key) {
            return Err(error.clone());
        }

        Ok(state.objects.get(key).map(|object| StoredObject {
            content: object.content.clone(),
            lock: object.lock.clone(),
        }))
    }

    async fn try_acquire_lock(
        &self,
        key: &StoreKey,
        holder_id: &str,
        _duration: Duration,
        expected_token: Option<&str>,
    ) -> AppResult<String> {
        let mut state = self.state.lock().await;
        state.acquire_attempts += 1;
        Self::take_injected(&mut state)?;
        state.issued_tokens += 1;
        let token = format!("{holder_id}:{}", state.issued_tokens);
        let rewrite = state.rewrites_before_acquire.remove(key);

        let object = state
            .objects
            .get_mut(key)
            .ok_or_else(|| AppError::Fatal(format!("no object at '{key}'")))?;
        if let Some(content) = rewrite {
            object.content = content;
            object.lock = None;
        }
        if let Some(lock) = &object.lock
            && lock.holder_id != holder_id
            && expected_token != Some(lock.token.as_str())
        {
            return Err(AppError::Conflict(format!(
                "'{key}' is locked by '{}'",
                lock.holder_id
            )));
        }

        object.lock = Some(StoreLock {
            token: token.clone(),
            holder_id: holder_id.to_owned(),
        });
        Ok(token)
    }

    async fn renew_lock(&self, key: &StoreKey, token: &str, _duration: Duration) -> AppResult<()> {
        let mut state = self.state.lock().await;
        Self::take_injected(&mut state)?;
        let held = state
            .objects
            .get(key)
            .and_then(|object| object.lock.as_ref())
            .is_some_and(|lock| lock.token == token);
        if !held {
            return Err(AppError::LockLost(format!("'{key}' is not locked by '{token}'")));
        }

        Ok(())
    }

    async fn release_lock(&self, key: &StoreKey, token: &str) -> AppResult<()> {
        let mut state = self.state.lock().await;
        Self::take_injected(&mut state)?;
        if let Some(object) = state.objects.get_mut(key)
            && object.lock.as_ref().is_some_and(|lock| lock.token == token)
        {
            object.lock = None;
        }

        Ok(())
    }

    async fn write_conditional(
        &self,
        key: &StoreKey,
        content: &[u8],
        token: &str,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;
        Self::take_injected(&mut state)?;
        match state.objects.get_mut(key) {
            Some(object) if object.lock.as_ref().is_some_and(|lock| lock.token == token) => {
                object.content = content.to_vec();
                Ok(())
            }
            _ => Err(AppError::LockLost(format!(
                "'{key}' is not locked by '{token}'"
            ))),
        }
    }

    async fn delete(&self, key: &StoreKey) -> AppResult<()> {
        let mut state = self.state.lock().await;
        Self::take_injected(&mut state)?;
        state.objects.remove(key);
        Ok(())
    }
}

/// Host double with a fixed partition list and captured log lines.
pub(crate) struct FakeHost {
    identity: HostIdentity,
    partition_ids: Vec<String>,
    logs: std::sync::Mutex<Vec<String>>,
}

impl FakeHost {
    pub(crate) fn new(host_name: &str, partition_ids: &[&str]) -> Self {
        Self {
            identity: HostIdentity::new(host_name, SOURCE_PATH, CONSUMER_GROUP)
                .unwrap_or_else(|_| unreachable!()),
            partition_ids: partition_ids.iter().map(|id| (*id).to_owned()).collect(),
            logs: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn logs(&self) -> Vec<String> {
        self.logs
            .lock()
            .map(|logs| logs.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PartitionManager for FakeHost {
    async fn partition_ids(&self) -> AppResult<Vec<String>> {
        Ok(self.partition_ids.clone())
    }
}

impl LeaseHost for FakeHost {
    fn identity(&self) -> &HostIdentity {
        &self.identity
    }

    fn partition_manager(&self) -> &dyn PartitionManager {
        self
    }

    fn log_with_host_and_partition(
        &self,
        partition_id: &str,
        message: &str,
        error: Option<&AppError>,
    ) {
        let line = match error {
            Some(error) => format!("{partition_id}: {message}: {}", error.kind()),
            None => format!("{partition_id}: {message}"),
        };
        if let Ok(mut logs) = self.logs.lock() {
            logs.push(line);
        }
    }
}

pub(crate) fn partition_key(partition_id: &str) -> LeaseKey {
    LeaseKey::new(SOURCE_PATH, CONSUMER_GROUP, partition_id).unwrap_or_else(|_| unreachable!())
}

pub(crate) fn manager_for(
    host: Arc<FakeHost>,
    store: Arc<FakeDurableStore>,
    max_attempts: u32,
) -> LeaseManager {
    let retry_policy = RetryPolicy::new(max_attempts, Duration::ZERO, Duration::ZERO)
        .unwrap_or_else(|_| unreachable!());
    let config = LeaseManagerConfig::new(Duration::from_secs(30), retry_policy)
        .unwrap_or_else(|_| unreachable!());

    LeaseManager::new(host, store).with_config(config)
}
