mod host;
mod store;

pub use host::{LeaseHost, PartitionManager};
pub use store::{DurableStore, StoreLock, StoredObject};
