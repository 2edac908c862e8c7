use async_trait::async_trait;
use leasekeeper_core::{AppError, AppResult, HostIdentity};
use tracing::{info, warn};

/// Enumerates the partitions of the leased source.
#[async_trait]
pub trait PartitionManager: Send + Sync {
    /// Returns every partition id of the source.
    async fn partition_ids(&self) -> AppResult<Vec<String>>;
}

/// Worker host collaborator consumed by the lease and checkpoint managers.
pub trait LeaseHost: Send + Sync {
    /// Returns this worker's identity.
    fn identity(&self) -> &HostIdentity;

    /// Returns the partition enumerator.
    fn partition_manager(&self) -> &dyn PartitionManager;

    /// Records one partition-scoped event, optionally with the failure behind it.
    fn log_with_host_and_partition(
        &self,
        partition_id: &str,
        message: &str,
        error: Option<&AppError>,
    ) {
        let identity = self.identity();
        match error {
            Some(error) => warn!(
                host = %identity.host_name(),
                partition = %partition_id,
                error_kind = error.kind(),
                error = %error,
                "{message}"
            ),
            None => info!(
                host = %identity.host_name(),
                partition = %partition_id,
                "{message}"
            ),
        }
    }
}
