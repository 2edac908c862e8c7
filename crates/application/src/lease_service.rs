use std::future::Future;
use std::sync::Arc;

use leasekeeper_core::{AppError, AppResult, HostIdentity};
use leasekeeper_domain::{Lease, LeaseKey};

use crate::lease_ports::{DurableStore, LeaseHost, StoreLock};

mod config;
mod ownership;
mod retry;
mod store_setup;

pub use config::{LeaseManagerConfig, RetryPolicy};

/// Result of fetching one partition's lease during a fan-out read.
#[derive(Debug)]
pub struct PartitionLease {
    /// Partition the fetch was issued for.
    pub partition_id: String,
    /// Fetched lease, `None` when no record exists yet.
    pub lease: AppResult<Option<Lease>>,
}

/// Lease lifecycle service backed by a durable store.
///
/// Holds no in-process lock: same-partition ordering comes only from the
/// store's conditional primitives.
#[derive(Clone)]
pub struct LeaseManager {
    host: Arc<dyn LeaseHost>,
    store: Arc<dyn DurableStore>,
    config: LeaseManagerConfig,
}

impl LeaseManager {
    /// Creates a lease manager with the default configuration.
    #[must_use]
    pub fn new(host: Arc<dyn LeaseHost>, store: Arc<dyn DurableStore>) -> Self {
        Self {
            host,
            store,
            config: LeaseManagerConfig::default(),
        }
    }

    /// Replaces the lease duration and retry tuning.
    #[must_use]
    pub fn with_config(mut self, config: LeaseManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &LeaseManagerConfig {
        &self.config
    }

    fn identity(&self) -> &HostIdentity {
        self.host.identity()
    }

    fn lease_key(&self, partition_id: &str) -> AppResult<LeaseKey> {
        let identity = self.identity();
        LeaseKey::new(
            identity.source_path(),
            identity.consumer_group_name(),
            partition_id,
        )
    }

    pub(crate) fn log(&self, partition_id: &str, message: &str, error: Option<&AppError>) {
        self.host
            .log_with_host_and_partition(partition_id, message, error);
    }

    async fn store_call<T, F, Fut>(&self, call: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        retry::retry_transient(self.config.retry_policy(), call).await
    }

    /// Reads and validates the remote record together with its live lock.
    pub(crate) async fn read_lease(
        &self,
        key: &LeaseKey,
    ) -> AppResult<Option<(Lease, Option<StoreLock>)>> {
        let store = self.store.as_ref();
        let store_key = key.store_key();
        let store_key = &store_key;
        let Some(object) = self.store_call(move || store.read(store_key)).await? else {
            return Ok(None);
        };

        let lease = Lease::from_json_bytes(&object.content, key)?;
        Ok(Some((lease, object.lock)))
    }

    /// Persists `lease` conditioned on `token` being the live lock.
    pub(crate) async fn write_lease(&self, lease: &Lease, token: &str) -> AppResult<()> {
        let store = self.store.as_ref();
        let content = lease.to_json_bytes()?;
        let content = content.as_slice();
        let store_key = lease.store_key();
        let store_key = &store_key;
        self.store_call(move || store.write_conditional(store_key, content, token))
            .await
    }
}
