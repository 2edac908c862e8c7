use serde::{Deserialize, Serialize};

use crate::{AppResult, NonEmptyString};

/// Identity of one worker host within a consumer group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostIdentity {
    host_name: NonEmptyString,
    source_path: NonEmptyString,
    consumer_group_name: NonEmptyString,
}

impl HostIdentity {
    /// Creates a host identity from the worker name and the stream it reads.
    pub fn new(
        host_name: impl Into<String>,
        source_path: impl Into<String>,
        consumer_group_name: impl Into<String>,
    ) -> AppResult<Self> {
        Ok(Self {
            host_name: NonEmptyString::new(host_name)?,
            source_path: NonEmptyString::new(source_path)?,
            consumer_group_name: NonEmptyString::new(consumer_group_name)?,
        })
    }

    /// Returns the lock holder identity used by this worker.
    #[must_use]
    pub fn host_name(&self) -> &str {
        self.host_name.as_str()
    }

    /// Returns the path of the streamed source whose partitions are leased.
    #[must_use]
    pub fn source_path(&self) -> &str {
        self.source_path.as_str()
    }

    /// Returns the consumer group sharing the partitions.
    #[must_use]
    pub fn consumer_group_name(&self) -> &str {
        self.consumer_group_name.as_str()
    }
}
