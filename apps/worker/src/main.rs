//! Leasekeeper partition ownership worker.

#![forbid(unsafe_code)]

mod ownership_loop;
mod worker_config;
mod worker_host;

use std::sync::Arc;

use leasekeeper_application::{CheckpointManager, DurableStore, LeaseManager};
use leasekeeper_core::{AppError, AppResult};
use leasekeeper_infrastructure::{InMemoryDurableStore, PostgresDurableStore, RedisDurableStore};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::ownership_loop::OwnershipLoop;
use crate::worker_config::{StoreBackend, WorkerConfig};
use crate::worker_host::WorkerHost;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let store = build_store(&config).await?;
    let host = Arc::new(WorkerHost::from_config(&config)?);
    let leases = LeaseManager::new(host, store).with_config(config.lease);
    let checkpoints = CheckpointManager::new(leases.clone());

    if checkpoints.create_checkpoint_store_if_not_exists().await? {
        info!(source_path = %config.source_path, "created lease store");
    }

    for partition_id in &config.partition_ids {
        if let Err(error) = leases.create_lease_if_not_exists(partition_id.as_str()).await {
            warn!(
                worker_id = %config.worker_id,
                partition = %partition_id,
                error = %error,
                "failed to ensure lease record"
            );
        }
    }

    info!(
        worker_id = %config.worker_id,
        backend = config.backend.as_str(),
        source_path = %config.source_path,
        consumer_group = %config.consumer_group,
        partition_count = config.partition_ids.len(),
        lease_ms = config.lease.lease_duration().as_millis(),
        renew_interval_ms = config.renew_interval.as_millis(),
        poll_interval_ms = config.poll_interval.as_millis(),
        max_owned_partitions = config.max_owned_partitions,
        "leasekeeper-worker started"
    );

    OwnershipLoop::new(
        leases,
        config.worker_id.as_str(),
        config.renew_interval,
        config.poll_interval,
        config.max_owned_partitions,
    )
    .run()
    .await;

    info!(worker_id = %config.worker_id, "leasekeeper-worker stopped");
    Ok(())
}

async fn build_store(config: &WorkerConfig) -> AppResult<Arc<dyn DurableStore>> {
    match &config.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryDurableStore::new())),
        StoreBackend::Redis { url, key_prefix } => {
            let client = redis::Client::open(url.as_str())
                .map_err(|error| AppError::Validation(format!("invalid REDIS_URL: {error}")))?;
            Ok(Arc::new(
                RedisDurableStore::new(client, key_prefix.as_str())
                    .with_operation_timeout(config.store_timeout),
            ))
        }
        StoreBackend::Postgres { database_url } => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url.as_str())
                .await
                .map_err(|error| {
                    AppError::Fatal(format!("failed to connect to database: {error}"))
                })?;

            sqlx::migrate!("../../crates/infrastructure/migrations")
                .run(&pool)
                .await
                .map_err(|error| AppError::Fatal(format!("failed to run migrations: {error}")))?;

            Ok(Arc::new(
                PostgresDurableStore::new(pool).with_operation_timeout(config.store_timeout),
            ))
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
