use std::fmt::{Display, Formatter};

use leasekeeper_core::{AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

/// Address of one object in a durable store.
///
/// Objects live under a namespace; lease records use the source path as the
/// namespace and `"<consumer_group>/<partition_id>"` as the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    namespace: String,
    name: String,
}

impl StoreKey {
    /// Creates a validated store key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> AppResult<Self> {
        Ok(Self {
            namespace: NonEmptyString::new(namespace)?.into(),
            name: NonEmptyString::new(name)?.into(),
        })
    }

    /// Returns the namespace (root container) of the object.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.namespace.as_str()
    }

    /// Returns the object name inside its namespace.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }
}

impl Display for StoreKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}/{}", self.namespace, self.name)
    }
}

/// Identifying triple of one partition lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseKey {
    source_path: String,
    consumer_group_name: String,
    partition_id: String,
}

impl LeaseKey {
    /// Creates a validated lease key.
    pub fn new(
        source_path: impl Into<String>,
        consumer_group_name: impl Into<String>,
        partition_id: impl Into<String>,
    ) -> AppResult<Self> {
        Ok(Self {
            source_path: NonEmptyString::new(source_path)?.into(),
            consumer_group_name: NonEmptyString::new(consumer_group_name)?.into(),
            partition_id: NonEmptyString::new(partition_id)?.into(),
        })
    }

    /// Returns the source path.
    #[must_use]
    pub fn source_path(&self) -> &str {
        self.source_path.as_str()
    }

    /// Returns the consumer group name.
    #[must_use]
    pub fn consumer_group_name(&self) -> &str {
        self.consumer_group_name.as_str()
    }

    /// Returns the partition identifier.
    #[must_use]
    pub fn partition_id(&self) -> &str {
        self.partition_id.as_str()
    }

    /// Returns the store address of the lease record.
    #[must_use]
    pub fn store_key(&self) -> StoreKey {
        StoreKey {
            namespace: self.source_path.clone(),
            name: format!("{}/{}", self.consumer_group_name, self.partition_id),
        }
    }
}
