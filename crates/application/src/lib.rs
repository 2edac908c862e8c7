//! Application services and ports.

#![forbid(unsafe_code)]

mod checkpoint_service;
mod lease_ports;
mod lease_service;

#[cfg(test)]
mod test_support;

pub use checkpoint_service::{CheckpointManager, PartitionCheckpoint};
pub use lease_ports::{DurableStore, LeaseHost, PartitionManager, StoreLock, StoredObject};
pub use lease_service::{LeaseManager, LeaseManagerConfig, PartitionLease, RetryPolicy};
