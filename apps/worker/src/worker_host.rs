use async_trait::async_trait;
use leasekeeper_application::{LeaseHost, PartitionManager};
use leasekeeper_core::{AppResult, HostIdentity};

use crate::worker_config::WorkerConfig;

/// Host backed by the static partition list of the worker configuration.
pub struct WorkerHost {
    identity: HostIdentity,
    partition_ids: Vec<String>,
}

impl WorkerHost {
    pub fn from_config(config: &WorkerConfig) -> AppResult<Self> {
        Ok(Self {
            identity: HostIdentity::new(
                config.worker_id.as_str(),
                config.source_path.as_str(),
                config.consumer_group.as_str(),
            )?,
            partition_ids: config.partition_ids.clone(),
        })
    }
}

#[async_trait]
impl PartitionManager for WorkerHost {
    async fn partition_ids(&self) -> AppResult<Vec<String>> {
        Ok(self.partition_ids.clone())
    }
}

impl LeaseHost for WorkerHost {
    fn identity(&self) -> &HostIdentity {
        &self.identity
    }

    fn partition_manager(&self) -> &dyn PartitionManager {
        self
    }
}
