use leasekeeper_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

use crate::store_key::{LeaseKey, StoreKey};

/// Last durably recorded processing position of one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    offset: String,
    sequence_number: Option<i64>,
}

impl Checkpoint {
    /// Creates a checkpoint at the given offset.
    pub fn new(offset: impl Into<String>, sequence_number: Option<i64>) -> AppResult<Self> {
        Ok(Self {
            offset: NonEmptyString::new(offset)?.into(),
            sequence_number,
        })
    }

    /// Returns the stream offset.
    #[must_use]
    pub fn offset(&self) -> &str {
        self.offset.as_str()
    }

    /// Returns the sequence number recorded with the offset, if any.
    #[must_use]
    pub fn sequence_number(&self) -> Option<i64> {
        self.sequence_number
    }
}

/// Ownership and progress record of one partition.
///
/// The serialized field names are part of the storage contract and must stay
/// stable while hosts of different versions share the same records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    #[serde(flatten)]
    key: LeaseKey,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    token: String,
    #[serde(default)]
    epoch: u64,
    #[serde(default)]
    offset: Option<String>,
    #[serde(default)]
    sequence_number: Option<i64>,
    #[serde(skip)]
    held: bool,
}

impl Lease {
    /// Creates an unowned lease at epoch zero with no checkpoint.
    #[must_use]
    pub fn new(key: LeaseKey) -> Self {
        Self {
            key,
            owner: String::new(),
            token: String::new(),
            epoch: 0,
            offset: None,
            sequence_number: None,
            held: false,
        }
    }

    /// Returns the identifying key.
    #[must_use]
    pub fn key(&self) -> &LeaseKey {
        &self.key
    }

    /// Returns the partition identifier.
    #[must_use]
    pub fn partition_id(&self) -> &str {
        self.key.partition_id()
    }

    /// Returns the store address of this record.
    #[must_use]
    pub fn store_key(&self) -> StoreKey {
        self.key.store_key()
    }

    /// Returns the current holder identity, empty when unheld.
    #[must_use]
    pub fn owner(&self) -> &str {
        self.owner.as_str()
    }

    /// Returns the lock token, empty when unheld.
    #[must_use]
    pub fn token(&self) -> &str {
        self.token.as_str()
    }

    /// Returns the ownership epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns the stored checkpoint, if one was ever written.
    #[must_use]
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.offset.as_ref().map(|offset| Checkpoint {
            offset: offset.clone(),
            sequence_number: self.sequence_number,
        })
    }

    /// Returns true when the record names an owner.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        !self.owner.is_empty()
    }

    /// Returns true when `host_name` is the recorded owner.
    #[must_use]
    pub fn is_owned_by(&self, host_name: &str) -> bool {
        self.is_owned() && self.owner == host_name
    }

    /// Returns whether the store reported a live lock when this copy was read.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Returns this copy annotated with the observed lock state.
    #[must_use]
    pub fn with_lock_observed(mut self, held: bool) -> Self {
        self.held = held;
        self
    }

    /// Returns the record after `owner` took the lock under `token`.
    ///
    /// The epoch moves forward by exactly one.
    pub fn acquired_by(&self, owner: &str, token: impl Into<String>) -> AppResult<Self> {
        let owner = NonEmptyString::new(owner)?;
        let token = NonEmptyString::new(token)?;
        let epoch = self.epoch.checked_add(1).ok_or_else(|| {
            AppError::Fatal(format!(
                "epoch overflow for partition '{}'",
                self.partition_id()
            ))
        })?;

        Ok(Self {
            owner: owner.into(),
            token: token.into(),
            epoch,
            held: true,
            ..self.clone()
        })
    }

    /// Returns the record with ownership cleared.
    #[must_use]
    pub fn released(&self) -> Self {
        Self {
            owner: String::new(),
            token: String::new(),
            held: false,
            ..self.clone()
        }
    }

    /// Returns the record with the checkpoint replaced.
    #[must_use]
    pub fn with_checkpoint(&self, checkpoint: Checkpoint) -> Self {
        Self {
            offset: Some(checkpoint.offset),
            sequence_number: checkpoint.sequence_number,
            ..self.clone()
        }
    }

    /// Returns the record with the checkpoint cleared.
    #[must_use]
    pub fn without_checkpoint(&self) -> Self {
        Self {
            offset: None,
            sequence_number: None,
            ..self.clone()
        }
    }

    /// Serializes the persisted fields to JSON bytes.
    pub fn to_json_bytes(&self) -> AppResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|error| {
            AppError::Fatal(format!(
                "failed to serialize lease for partition '{}': {error}",
                self.partition_id()
            ))
        })
    }

    /// Parses a persisted record and checks it belongs to `expected`.
    pub fn from_json_bytes(bytes: &[u8], expected: &LeaseKey) -> AppResult<Self> {
        let lease: Self = serde_json::from_slice(bytes).map_err(|error| {
            AppError::Fatal(format!(
                "malformed lease record at '{}': {error}",
                expected.store_key()
            ))
        })?;

        if &lease.key != expected {
            return Err(AppError::Fatal(format!(
                "lease record at '{}' belongs to '{}'",
                expected.store_key(),
                lease.key.store_key()
            )));
        }

        if lease.owner.is_empty() != lease.token.is_empty() {
            return Err(AppError::Fatal(format!(
                "lease record at '{}' has mismatched owner and token",
                expected.store_key()
            )));
        }

        Ok(lease)
    }
}

#[cfg(test)]
mod tests {
    use leasekeeper_core::AppError;
    use proptest::prelude::*;
    use serde_json::{Value, json};

    use super::{Checkpoint, Lease};
    use crate::LeaseKey;

    fn partition_key(partition_id: &str) -> LeaseKey {
        LeaseKey::new("telemetry", "$Default", partition_id).unwrap_or_else(|_| unreachable!())
    }

    #[test]
    fn new_lease_is_unowned_at_epoch_zero() {
        let lease = Lease::new(partition_key("p3"));

        assert_eq!(lease.owner(), "");
        assert_eq!(lease.token(), "");
        assert_eq!(lease.epoch(), 0);
        assert!(lease.checkpoint().is_none());
        assert!(!lease.is_held());
    }

    #[test]
    fn persisted_field_names_are_stable() {
        let lease = Lease::new(partition_key("p1"))
            .acquired_by("host-a", "host-a:t1")
            .unwrap_or_else(|_| unreachable!())
            .with_checkpoint(Checkpoint::new("500", Some(42)).unwrap_or_else(|_| unreachable!()));

        let bytes = lease.to_json_bytes().unwrap_or_default();
        let value: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        assert_eq!(
            value,
            json!({
                "sourcePath": "telemetry",
                "consumerGroupName": "$Default",
                "partitionId": "p1",
                "owner": "host-a",
                "token": "host-a:t1",
                "epoch": 1,
                "offset": "500",
                "sequenceNumber": 42
            })
        );
    }

    #[test]
    fn parsing_tolerates_unknown_and_missing_optional_fields() {
        let bytes = br#"{
            "sourcePath": "telemetry",
            "consumerGroupName": "$Default",
            "partitionId": "p1",
            "epoch": 4,
            "leaseKind": "blob"
        }"#;

        let lease = Lease::from_json_bytes(bytes, &partition_key("p1"));
        assert!(lease.is_ok());

        let lease = lease.unwrap_or_else(|_| unreachable!());
        assert_eq!(lease.epoch(), 4);
        assert!(!lease.is_owned());
        assert!(lease.checkpoint().is_none());
    }

    #[test]
    fn parsing_rejects_record_of_another_partition() {
        let bytes = Lease::new(partition_key("p2"))
            .to_json_bytes()
            .unwrap_or_default();

        let result = Lease::from_json_bytes(&bytes, &partition_key("p1"));
        assert!(matches!(result, Err(AppError::Fatal(_))));
    }

    #[test]
    fn parsing_rejects_owner_without_token() {
        let bytes = br#"{
            "sourcePath": "telemetry",
            "consumerGroupName": "$Default",
            "partitionId": "p1",
            "owner": "host-a",
            "token": "",
            "epoch": 1
        }"#;

        let result = Lease::from_json_bytes(bytes, &partition_key("p1"));
        assert!(matches!(result, Err(AppError::Fatal(_))));
    }

    #[test]
    fn parsing_rejects_garbage() {
        let result = Lease::from_json_bytes(b"not json", &partition_key("p1"));
        assert!(matches!(result, Err(AppError::Fatal(_))));
    }

    #[test]
    fn release_keeps_epoch_and_checkpoint() {
        let held = Lease::new(partition_key("p1"))
            .acquired_by("host-a", "host-a:t1")
            .unwrap_or_else(|_| unreachable!())
            .with_checkpoint(Checkpoint::new("500", None).unwrap_or_else(|_| unreachable!()));

        let released = held.released();
        assert_eq!(released.epoch(), 1);
        assert_eq!(released.owner(), "");
        assert_eq!(released.token(), "");
        assert_eq!(
            released.checkpoint().map(|checkpoint| checkpoint.offset().to_owned()),
            Some("500".to_owned())
        );
    }

    #[test]
    fn acquire_fails_on_epoch_overflow() {
        let bytes = json!({
            "sourcePath": "telemetry",
            "consumerGroupName": "$Default",
            "partitionId": "p1",
            "epoch": u64::MAX,
        })
        .to_string();
        let lease = Lease::from_json_bytes(bytes.as_bytes(), &partition_key("p1"))
            .unwrap_or_else(|_| unreachable!());

        let result = lease.acquired_by("host-a", "host-a:t1");
        assert!(matches!(result, Err(AppError::Fatal(_))));
    }

    proptest! {
        #[test]
        fn acquiring_advances_epoch_by_exactly_one(
            steals in 0_usize..32,
            owner in "[a-z]{1,12}",
        ) {
            let mut lease = Lease::new(partition_key("p1"));
            for round in 0..steals {
                let before = lease.epoch();
                lease = lease
                    .acquired_by(owner.as_str(), format!("{owner}:{round}"))
                    .unwrap_or_else(|_| unreachable!());
                prop_assert_eq!(lease.epoch(), before + 1);

                let released = lease.released();
                prop_assert_eq!(released.epoch(), lease.epoch());
            }
            prop_assert_eq!(lease.epoch(), steals as u64);
        }
    }
}
