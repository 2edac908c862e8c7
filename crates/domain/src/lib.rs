//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod lease;
mod store_key;

pub use lease::{Checkpoint, Lease};
pub use store_key::{LeaseKey, StoreKey};
