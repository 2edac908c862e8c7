use std::collections::BTreeMap;
use std::time::Duration;

use leasekeeper_application::LeaseManager;
use leasekeeper_core::AppResult;
use leasekeeper_domain::Lease;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Renews, acquires and finally releases the partitions this worker owns.
pub struct OwnershipLoop {
    leases: LeaseManager,
    worker_id: String,
    renew_interval: Duration,
    poll_interval: Duration,
    max_owned_partitions: usize,
    owned: BTreeMap<String, Lease>,
}

impl OwnershipLoop {
    pub fn new(
        leases: LeaseManager,
        worker_id: impl Into<String>,
        renew_interval: Duration,
        poll_interval: Duration,
        max_owned_partitions: usize,
    ) -> Self {
        Self {
            leases,
            worker_id: worker_id.into(),
            renew_interval,
            poll_interval,
            max_owned_partitions,
            owned: BTreeMap::new(),
        }
    }

    /// Runs until Ctrl-C, then releases every owned lease.
    pub async fn run(mut self) {
        let mut renew_timer = tokio::time::interval(self.renew_interval);
        renew_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll_timer = tokio::time::interval(self.poll_interval);
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = renew_timer.tick() => self.renew_owned().await,
                _ = poll_timer.tick() => {
                    if let Err(error) = self.acquire_available().await {
                        warn!(worker_id = %self.worker_id, error = %error, "partition scan failed");
                    }
                }
                signal = &mut shutdown => {
                    if let Err(error) = signal {
                        warn!(
                            worker_id = %self.worker_id,
                            error = %error,
                            "failed to listen for shutdown signal"
                        );
                    }
                    break;
                }
            }
        }

        info!(
            worker_id = %self.worker_id,
            owned_count = self.owned.len(),
            "shutting down, releasing owned leases"
        );
        self.release_all().await;
    }

    #[cfg(test)]
    fn owned_partitions(&self) -> Vec<&str> {
        self.owned.keys().map(String::as_str).collect()
    }

    /// Renews every owned lease, dropping those whose ownership moved on.
    pub async fn renew_owned(&mut self) {
        let mut lost = Vec::new();
        for (partition_id, lease) in &self.owned {
            match self.leases.renew_lease(lease).await {
                Ok(()) => {}
                Err(error) if error.is_ownership_lost() => lost.push(partition_id.clone()),
                Err(error) => warn!(
                    worker_id = %self.worker_id,
                    partition = %partition_id,
                    error = %error,
                    "lease renewal failed, will retry next interval"
                ),
            }
        }

        for partition_id in lost {
            self.owned.remove(&partition_id);
            warn!(
                worker_id = %self.worker_id,
                partition = %partition_id,
                "lease lost to another worker"
            );
        }
    }

    /// Scans all leases and acquires unheld ones until the ownership cap.
    ///
    /// Only a failure to enumerate partitions is returned; per-partition
    /// failures are logged and retried on the next scan.
    pub async fn acquire_available(&mut self) -> AppResult<()> {
        for fetched in self.leases.get_all_leases().await? {
            if self.owned.len() >= self.max_owned_partitions {
                break;
            }

            if self.owned.contains_key(&fetched.partition_id) {
                continue;
            }

            let Ok(Some(lease)) = fetched.lease else {
                continue;
            };

            if lease.is_held() && !lease.is_owned_by(self.worker_id.as_str()) {
                continue;
            }

            match self.leases.acquire_lease(&lease).await {
                Ok(acquired) => {
                    info!(
                        worker_id = %self.worker_id,
                        partition = %fetched.partition_id,
                        epoch = acquired.epoch(),
                        "partition acquired"
                    );
                    self.owned.insert(fetched.partition_id, acquired);
                }
                Err(error) if error.is_lost_race() => debug!(
                    worker_id = %self.worker_id,
                    partition = %fetched.partition_id,
                    "another worker acquired the partition first"
                ),
                Err(error) => warn!(
                    worker_id = %self.worker_id,
                    partition = %fetched.partition_id,
                    error = %error,
                    "partition acquisition failed"
                ),
            }
        }

        Ok(())
    }

    pub async fn release_all(&mut self) {
        for (partition_id, lease) in std::mem::take(&mut self.owned) {
            if let Err(error) = self.leases.release_lease(&lease).await {
                warn!(
                    worker_id = %self.worker_id,
                    partition = %partition_id,
                    error = %error,
                    "lease release failed, it will expire on its own"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use leasekeeper_application::LeaseManager;
    use leasekeeper_infrastructure::InMemoryDurableStore;

    use super::OwnershipLoop;
    use crate::worker_config::WorkerConfig;
    use crate::worker_host::WorkerHost;

    const PARTITIONS: &str = "0,1,2";

    fn worker(name: &str, max_owned: usize, store: &Arc<InMemoryDurableStore>) -> OwnershipLoop {
        let config = WorkerConfig::from_lookup(|var| match var {
            "SOURCE_PATH" => Some("telemetry".to_owned()),
            "WORKER_ID" => Some(name.to_owned()),
            "PARTITION_IDS" => Some(PARTITIONS.to_owned()),
            _ => None,
        })
        .unwrap_or_else(|_| unreachable!());
        let host = WorkerHost::from_config(&config).unwrap_or_else(|_| unreachable!());
        let leases = LeaseManager::new(Arc::new(host), store.clone()).with_config(config.lease);

        OwnershipLoop::new(
            leases,
            name,
            config.renew_interval,
            config.poll_interval,
            max_owned,
        )
    }

    async fn prepare(ownership: &OwnershipLoop) {
        assert!(ownership.leases.create_lease_store_if_not_exists().await.is_ok());
        for partition_id in PARTITIONS.split(',') {
            assert!(
                ownership
                    .leases
                    .create_lease_if_not_exists(partition_id)
                    .await
                    .is_ok()
            );
        }
    }

    #[tokio::test]
    async fn workers_split_partitions_up_to_their_cap() {
        let store = Arc::new(InMemoryDurableStore::new());
        let mut first = worker("worker-a", 2, &store);
        let mut second = worker("worker-b", 2, &store);
        prepare(&first).await;

        assert!(first.acquire_available().await.is_ok());
        assert!(second.acquire_available().await.is_ok());

        assert_eq!(first.owned_partitions(), vec!["0", "1"]);
        assert_eq!(second.owned_partitions(), vec!["2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_partitions_move_and_renewal_drops_them() {
        let store = Arc::new(InMemoryDurableStore::new());
        let mut first = worker("worker-a", 3, &store);
        let mut second = worker("worker-b", 3, &store);
        prepare(&first).await;
        assert!(first.acquire_available().await.is_ok());
        assert!(second.acquire_available().await.is_ok());
        assert!(second.owned_partitions().is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(second.acquire_available().await.is_ok());
        assert_eq!(second.owned_partitions(), vec!["0", "1", "2"]);

        first.renew_owned().await;
        assert!(first.owned_partitions().is_empty());
    }

    #[tokio::test]
    async fn release_all_frees_partitions_for_others() {
        let store = Arc::new(InMemoryDurableStore::new());
        let mut first = worker("worker-a", 3, &store);
        let mut second = worker("worker-b", 3, &store);
        prepare(&first).await;
        assert!(first.acquire_available().await.is_ok());

        first.release_all().await;
        assert!(first.owned_partitions().is_empty());

        assert!(second.acquire_available().await.is_ok());
        assert_eq!(second.owned_partitions().len(), 3);
        let epoch = second
            .leases
            .get_lease("1")
            .await
            .ok()
            .flatten()
            .map(|lease| lease.epoch());
        assert_eq!(epoch, Some(2));
    }
}
