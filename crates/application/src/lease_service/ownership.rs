use leasekeeper_domain::StoreKey;

use super::*;

impl LeaseManager {
    /// Acquires the lease for this host, stealing it when the lock expired.
    ///
    /// When a different live holder owns the lock, the caller's last-known
    /// token is presented as the fencing token; a mismatch fails with
    /// `Conflict`, meaning another host won the race. On success the returned
    /// copy carries this host as owner, the new token and the next epoch.
    pub async fn acquire_lease(&self, lease: &Lease) -> AppResult<Lease> {
        let partition_id = lease.partition_id();
        let Some((_, current_lock)) = self.read_lease(lease.key()).await? else {
            return Err(missing_record(partition_id));
        };

        let host_name = self.identity().host_name();
        let expected_token = match &current_lock {
            Some(lock) if lock.holder_id != host_name => {
                Some(lease.token()).filter(|token| !token.is_empty())
            }
            _ => None,
        };

        let store = self.store.as_ref();
        let store_key = lease.store_key();
        let store_key = &store_key;
        let duration = self.config.lease_duration();
        let token = match self
            .store_call(move || {
                store.try_acquire_lock(store_key, host_name, duration, expected_token)
            })
            .await
        {
            Ok(token) => token,
            Err(error) => {
                self.log(partition_id, "AcquireLease lost", Some(&error));
                return Err(error);
            }
        };

        let (previous, acquired) = match self.claim_record(lease.key(), token.as_str()).await {
            Ok(claimed) => claimed,
            Err(error) => {
                self.log(partition_id, "AcquireLease failed to persist owner", Some(&error));
                self.abandon_lock(partition_id, store_key, token.as_str()).await;
                return Err(error);
            }
        };

        let message = if previous.is_owned() && !previous.is_owned_by(host_name) {
            format!(
                "AcquireLease took over from {} at epoch {}",
                previous.owner(),
                acquired.epoch()
            )
        } else {
            format!("AcquireLease succeeded at epoch {}", acquired.epoch())
        };
        self.log(partition_id, message.as_str(), None);

        Ok(acquired)
    }

    /// Rewrites the record under a freshly granted lock.
    ///
    /// The record is read again after the grant so the new epoch and the
    /// carried checkpoint build on whatever the previous holder persisted.
    async fn claim_record(&self, key: &LeaseKey, token: &str) -> AppResult<(Lease, Lease)> {
        let Some((previous, _)) = self.read_lease(key).await? else {
            return Err(missing_record(key.partition_id()));
        };

        let acquired = previous.acquired_by(self.identity().host_name(), token)?;
        self.write_lease(&acquired, token).await?;
        Ok((previous, acquired))
    }

    async fn abandon_lock(&self, partition_id: &str, store_key: &StoreKey, token: &str) {
        let store = self.store.as_ref();
        if let Err(error) = self
            .store_call(move || store.release_lock(store_key, token))
            .await
        {
            self.log(partition_id, "AcquireLease failed to release lock", Some(&error));
        }
    }

    /// Extends the held lock for another lease duration.
    ///
    /// `LockLost` means ownership already passed to another host and the
    /// caller must stop processing the partition.
    pub async fn renew_lease(&self, lease: &Lease) -> AppResult<()> {
        let partition_id = lease.partition_id();
        let token = lease.token();
        if token.is_empty() {
            return Err(AppError::LockLost(format!(
                "lease for partition '{partition_id}' is not held"
            )));
        }

        let store = self.store.as_ref();
        let store_key = lease.store_key();
        let store_key = &store_key;
        let duration = self.config.lease_duration();
        let result = self
            .store_call(move || store.renew_lock(store_key, token, duration))
            .await;

        if let Err(error) = &result {
            self.log(partition_id, "RenewLease failed", Some(error));
        }

        result
    }

    /// Clears ownership in the record and releases the lock.
    ///
    /// Succeeds when the lease was already released, expired or stolen.
    pub async fn release_lease(&self, lease: &Lease) -> AppResult<()> {
        let partition_id = lease.partition_id();
        let token = lease.token();
        if token.is_empty() {
            return Ok(());
        }

        let Some((remote, current_lock)) = self.read_lease(lease.key()).await? else {
            return Ok(());
        };

        if current_lock.is_none_or(|lock| lock.token != token) {
            self.log(partition_id, "ReleaseLease found the lease already gone", None);
            return Ok(());
        }

        match self.write_lease(&remote.released(), token).await {
            Ok(()) => {}
            Err(AppError::LockLost(_)) => {
                self.log(partition_id, "ReleaseLease lost the lease mid-release", None);
                return Ok(());
            }
            Err(error) => return Err(error),
        }

        let store = self.store.as_ref();
        let store_key = lease.store_key();
        let store_key = &store_key;
        match self
            .store_call(move || store.release_lock(store_key, token))
            .await
        {
            Ok(()) | Err(AppError::LockLost(_) | AppError::Conflict(_)) => {}
            Err(error) => return Err(error),
        }

        self.log(partition_id, "ReleaseLease completed", None);
        Ok(())
    }

    /// Renews the lease, then persists the caller's copy under the held token.
    pub async fn update_lease(&self, lease: &Lease) -> AppResult<()> {
        let partition_id = lease.partition_id();
        if lease.token().is_empty() {
            return Err(AppError::LockLost(format!(
                "lease for partition '{partition_id}' is not held"
            )));
        }

        if !lease.is_owned_by(self.identity().host_name()) {
            return Err(AppError::Validation(format!(
                "lease for partition '{partition_id}' is owned by '{}'",
                lease.owner()
            )));
        }

        self.renew_lease(lease).await?;

        let result = self.write_lease(lease, lease.token()).await;
        if let Err(error) = &result {
            self.log(partition_id, "UpdateLease failed", Some(error));
        }

        result
    }
}

fn missing_record(partition_id: &str) -> AppError {
    AppError::Fatal(format!("no lease record exists for partition '{partition_id}'"))
}
