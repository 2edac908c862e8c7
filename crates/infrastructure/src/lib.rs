//! Durable store adapters for the lease and checkpoint managers.

#![forbid(unsafe_code)]

mod in_memory_durable_store;
mod postgres_durable_store;
mod redis_durable_store;
mod store_errors;

pub use in_memory_durable_store::InMemoryDurableStore;
pub use postgres_durable_store::PostgresDurableStore;
pub use redis_durable_store::RedisDurableStore;
pub use store_errors::DEFAULT_OPERATION_TIMEOUT;
