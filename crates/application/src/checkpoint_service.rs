//! Checkpoint persistence co-located with the lease record.
//!
//! Progress and ownership live in one record, so a checkpoint write is the
//! same conditional operation that proves the writer still holds the lease.
//! A host that lost its lease can never persist stale progress.

use leasekeeper_core::{AppError, AppResult};
use leasekeeper_domain::{Checkpoint, Lease};

use crate::lease_service::LeaseManager;

/// Result of fetching one partition's checkpoint during a fan-out read.
#[derive(Debug)]
pub struct PartitionCheckpoint {
    /// Partition the fetch was issued for.
    pub partition_id: String,
    /// Stored checkpoint, `None` before the first update.
    pub checkpoint: AppResult<Option<Checkpoint>>,
}

/// Checkpoint service sharing the lease manager's store and host.
#[derive(Clone)]
pub struct CheckpointManager {
    leases: LeaseManager,
}

impl CheckpointManager {
    /// Creates a checkpoint manager over the given lease manager.
    #[must_use]
    pub fn new(leases: LeaseManager) -> Self {
        Self { leases }
    }

    /// Returns whether the checkpoint store exists.
    pub async fn checkpoint_store_exists(&self) -> AppResult<bool> {
        self.leases.lease_store_exists().await
    }

    /// Creates the checkpoint store and returns false when it already existed.
    pub async fn create_checkpoint_store_if_not_exists(&self) -> AppResult<bool> {
        self.leases.create_lease_store_if_not_exists().await
    }

    /// Returns the stored checkpoint of one partition.
    pub async fn get_checkpoint(&self, partition_id: &str) -> AppResult<Option<Checkpoint>> {
        Ok(self
            .leases
            .get_lease(partition_id)
            .await?
            .and_then(|lease| lease.checkpoint()))
    }

    /// Returns the stored checkpoints of every partition the host enumerates.
    pub async fn get_all_checkpoints(&self) -> AppResult<Vec<PartitionCheckpoint>> {
        Ok(self
            .leases
            .get_all_leases()
            .await?
            .into_iter()
            .map(|fetched| PartitionCheckpoint {
                partition_id: fetched.partition_id,
                checkpoint: fetched
                    .lease
                    .map(|lease| lease.and_then(|lease| lease.checkpoint())),
            })
            .collect())
    }

    /// Records progress for the partition of the held `lease`.
    ///
    /// Fails with `LockLost`, leaving the stored offset unchanged, when the
    /// lease token is no longer the live lock.
    pub async fn update_checkpoint(
        &self,
        lease: &Lease,
        checkpoint: Checkpoint,
    ) -> AppResult<Lease> {
        let offset = checkpoint.offset().to_owned();
        let updated = self
            .rewrite_held(lease, move |remote| remote.with_checkpoint(checkpoint))
            .await;

        match &updated {
            Ok(_) => self.leases.log(
                lease.partition_id(),
                format!("UpdateCheckpoint stored offset {offset}").as_str(),
                None,
            ),
            Err(error) => self
                .leases
                .log(lease.partition_id(), "UpdateCheckpoint failed", Some(error)),
        }

        updated
    }

    /// Clears the stored checkpoint of the held `lease`'s partition.
    pub async fn delete_checkpoint(&self, lease: &Lease) -> AppResult<Lease> {
        self.rewrite_held(lease, Lease::without_checkpoint).await
    }

    async fn rewrite_held<F>(&self, lease: &Lease, rewrite: F) -> AppResult<Lease>
    where
        F: FnOnce(&Lease) -> Lease,
    {
        let partition_id = lease.partition_id();
        let token = lease.token();
        if token.is_empty() {
            return Err(AppError::LockLost(format!(
                "lease for partition '{partition_id}' is not held"
            )));
        }

        let Some((remote, current_lock)) = self.leases.read_lease(lease.key()).await? else {
            return Err(AppError::Fatal(format!(
                "no lease record exists for partition '{partition_id}'"
            )));
        };

        if current_lock.is_none_or(|lock| lock.token != token) {
            return Err(AppError::LockLost(format!(
                "lease for partition '{partition_id}' is no longer held under the presented token"
            )));
        }

        let updated = rewrite(&remote).with_lock_observed(true);
        self.leases.write_lease(&updated, token).await?;
        Ok(updated)
    }
}
