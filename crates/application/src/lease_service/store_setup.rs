use futures::future::join_all;

use super::*;

impl LeaseManager {
    /// Returns whether the lease namespace of this source exists.
    pub async fn lease_store_exists(&self) -> AppResult<bool> {
        let store = self.store.as_ref();
        let namespace = self.identity().source_path();
        self.store_call(move || store.namespace_exists(namespace))
            .await
    }

    /// Creates the lease namespace and returns false when it already existed.
    pub async fn create_lease_store_if_not_exists(&self) -> AppResult<bool> {
        let store = self.store.as_ref();
        let namespace = self.identity().source_path();
        self.store_call(move || store.create_namespace_if_absent(namespace))
            .await
    }

    /// Fetches the lease of one partition, `None` when no record exists.
    pub async fn get_lease(&self, partition_id: &str) -> AppResult<Option<Lease>> {
        let key = self.lease_key(partition_id)?;
        let lease = self
            .read_lease(&key)
            .await?
            .map(|(lease, lock)| lease.with_lock_observed(lock.is_some()));
        Ok(lease)
    }

    /// Fetches the leases of every partition the host enumerates.
    ///
    /// Fetches run concurrently and each partition reports its own outcome.
    pub async fn get_all_leases(&self) -> AppResult<Vec<PartitionLease>> {
        let partition_ids = self.host.partition_manager().partition_ids().await?;

        let fetches = partition_ids.into_iter().map(|partition_id| async move {
            let lease = self.get_lease(partition_id.as_str()).await;
            if let Err(error) = &lease {
                self.log(partition_id.as_str(), "GetLease failed", Some(error));
            }

            PartitionLease {
                partition_id,
                lease,
            }
        });

        Ok(join_all(fetches).await)
    }

    /// Creates an unowned lease record for the partition.
    ///
    /// Returns false when the record already existed; the existing record is
    /// left untouched.
    pub async fn create_lease_if_not_exists(&self, partition_id: &str) -> AppResult<bool> {
        let key = self.lease_key(partition_id)?;
        let content = Lease::new(key.clone()).to_json_bytes()?;
        let content = content.as_slice();
        let store = self.store.as_ref();
        let store_key = key.store_key();
        let store_key = &store_key;

        self.log(
            partition_id,
            format!(
                "CreateLeaseIfNotExists - sourcePath: {} consumerGroupName: {}",
                key.source_path(),
                key.consumer_group_name()
            )
            .as_str(),
            None,
        );

        match self
            .store_call(move || store.create_if_absent(store_key, content))
            .await
        {
            Ok(()) => Ok(true),
            Err(error @ AppError::AlreadyExists(_)) => {
                self.log(
                    partition_id,
                    "CreateLeaseIfNotExists found an existing lease",
                    Some(&error),
                );
                Ok(false)
            }
            Err(error) => {
                self.log(partition_id, "CreateLeaseIfNotExists failed", Some(&error));
                Err(error)
            }
        }
    }

    /// Removes the lease record and any lock on it.
    pub async fn delete_lease(&self, lease: &Lease) -> AppResult<()> {
        let store = self.store.as_ref();
        let store_key = lease.store_key();
        let store_key = &store_key;
        self.store_call(move || store.delete(store_key)).await?;
        self.log(lease.partition_id(), "DeleteLease completed", None);
        Ok(())
    }
}
