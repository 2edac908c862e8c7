use std::time::Duration;

use async_trait::async_trait;
use leasekeeper_application::{DurableStore, StoreLock, StoredObject};
use leasekeeper_core::{AppError, AppResult};
use leasekeeper_domain::StoreKey;
use sqlx::{FromRow, PgPool};
use tracing::debug;

use crate::store_errors::{
    DEFAULT_OPERATION_TIMEOUT, bounded, classify_sqlx_error, duration_millis,
};

/// PostgreSQL-backed durable store.
///
/// Locks are columns on the object row and are only honored while
/// `lock_expires_at` lies in the future by the database clock.
#[derive(Clone)]
pub struct PostgresDurableStore {
    pool: PgPool,
    operation_timeout: Duration,
}

impl PostgresDurableStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Overrides the per-call timeout.
    #[must_use]
    pub fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }
}

#[derive(Debug, FromRow)]
struct StoredObjectRow {
    content: Vec<u8>,
    lock_token: Option<String>,
    lock_holder: Option<String>,
}

impl StoredObjectRow {
    fn into_stored_object(self) -> StoredObject {
        let lock = match (self.lock_token, self.lock_holder) {
            (Some(token), Some(holder_id)) => Some(StoreLock { token, holder_id }),
            _ => None,
        };

        StoredObject {
            content: self.content,
            lock,
        }
    }
}

fn lock_lost(key: &StoreKey, token: &str) -> AppError {
    AppError::LockLost(format!("'{key}' is no longer locked with token '{token}'"))
}

#[async_trait]
impl DurableStore for PostgresDurableStore {
    async fn namespace_exists(&self, namespace: &str) -> AppResult<bool> {
        bounded(self.operation_timeout, "check namespace", namespace, async {
            sqlx::query_scalar::<_, bool>(
                r#"
                SELECT EXISTS (SELECT 1 FROM lease_store_namespaces WHERE name = $1)
                "#,
            )
            .bind(namespace)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| classify_sqlx_error("check namespace", namespace, &error))
        })
        .await
    }

    async fn create_namespace_if_absent(&self, namespace: &str) -> AppResult<bool> {
        if namespace.trim().is_empty() {
            return Err(AppError::Validation(
                "store namespace must not be empty".to_owned(),
            ));
        }

        let result = bounded(self.operation_timeout, "create namespace", namespace, async {
            sqlx::query(
                r#"
                INSERT INTO lease_store_namespaces (name)
                VALUES ($1)
                ON CONFLICT (name) DO NOTHING
                "#,
            )
            .bind(namespace)
            .execute(&self.pool)
            .await
            .map_err(|error| classify_sqlx_error("create namespace", namespace, &error))
        })
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn exists(&self, key: &StoreKey) -> AppResult<bool> {
        bounded(self.operation_timeout, "check", key, async {
            sqlx::query_scalar::<_, bool>(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM lease_store_objects WHERE namespace = $1 AND name = $2
                )
                "#,
            )
            .bind(key.namespace())
            .bind(key.name())
            .fetch_one(&self.pool)
            .await
            .map_err(|error| classify_sqlx_error("check", key, &error))
        })
        .await
    }

    async fn create_if_absent(&self, key: &StoreKey, content: &[u8]) -> AppResult<()> {
        let result = bounded(self.operation_timeout, "create", key, async {
            sqlx::query(
                r#"
                INSERT INTO lease_store_objects (namespace, name, content)
                VALUES ($1, $2, $3)
                ON CONFLICT (namespace, name) DO NOTHING
                "#,
            )
            .bind(key.namespace())
            .bind(key.name())
            .bind(content)
            .execute(&self.pool)
            .await
            .map_err(|error| classify_sqlx_error("create", key, &error))
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::AlreadyExists(format!("'{key}' already exists")));
        }

        Ok(())
    }

    async fn read(&self, key: &StoreKey) -> AppResult<Option<StoredObject>> {
        let row = bounded(self.operation_timeout, "read", key, async {
            sqlx::query_as::<_, StoredObjectRow>(
                r#"
                SELECT
                    content,
                    CASE WHEN lock_expires_at > now() THEN lock_token END AS lock_token,
                    CASE WHEN lock_expires_at > now() THEN lock_holder END AS lock_holder
                FROM lease_store_objects
                WHERE namespace = $1 AND name = $2
                "#,
            )
            .bind(key.namespace())
            .bind(key.name())
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| classify_sqlx_error("read", key, &error))
        })
        .await?;

        Ok(row.map(StoredObjectRow::into_stored_object))
    }

    async fn try_acquire_lock(
        &self,
        key: &StoreKey,
        holder_id: &str,
        duration: Duration,
        expected_token: Option<&str>,
    ) -> AppResult<String> {
        if holder_id.trim().is_empty() {
            return Err(AppError::Validation(
                "lock holder_id must not be empty".to_owned(),
            ));
        }

        let token = format!("{holder_id}:{}", uuid::Uuid::new_v4());
        let result = bounded(self.operation_timeout, "acquire lock on", key, async {
            sqlx::query(
                r#"
                UPDATE lease_store_objects
                SET lock_token = $3,
                    lock_holder = $4,
                    lock_expires_at = now() + ($5::BIGINT * INTERVAL '1 millisecond'),
                    updated_at = now()
                WHERE namespace = $1
                    AND name = $2
                    AND (
                        lock_token IS NULL
                        OR lock_expires_at <= now()
                        OR lock_holder = $4
                        OR lock_token = $6
                    )
                "#,
            )
            .bind(key.namespace())
            .bind(key.name())
            .bind(token.as_str())
            .bind(holder_id)
            .bind(duration_millis(duration))
            .bind(expected_token)
            .execute(&self.pool)
            .await
            .map_err(|error| classify_sqlx_error("acquire lock on", key, &error))
        })
        .await?;

        if result.rows_affected() == 1 {
            return Ok(token);
        }

        if self.exists(key).await? {
            Err(AppError::Conflict(format!(
                "'{key}' is locked by another holder"
            )))
        } else {
            Err(AppError::Fatal(format!("no object stored at '{key}'")))
        }
    }

    async fn renew_lock(&self, key: &StoreKey, token: &str, duration: Duration) -> AppResult<()> {
        let result = bounded(self.operation_timeout, "renew lock on", key, async {
            sqlx::query(
                r#"
                UPDATE lease_store_objects
                SET lock_expires_at = now() + ($4::BIGINT * INTERVAL '1 millisecond')
                WHERE namespace = $1
                    AND name = $2
                    AND lock_token = $3
                    AND lock_expires_at > now()
                "#,
            )
            .bind(key.namespace())
            .bind(key.name())
            .bind(token)
            .bind(duration_millis(duration))
            .execute(&self.pool)
            .await
            .map_err(|error| classify_sqlx_error("renew lock on", key, &error))
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(lock_lost(key, token));
        }

        Ok(())
    }

    async fn release_lock(&self, key: &StoreKey, token: &str) -> AppResult<()> {
        let result = bounded(self.operation_timeout, "release lock on", key, async {
            sqlx::query(
                r#"
                UPDATE lease_store_objects
                SET lock_token = NULL,
                    lock_holder = NULL,
                    lock_expires_at = NULL
                WHERE namespace = $1 AND name = $2 AND lock_token = $3
                "#,
            )
            .bind(key.namespace())
            .bind(key.name())
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(|error| classify_sqlx_error("release lock on", key, &error))
        })
        .await?;

        if result.rows_affected() == 0 {
            debug!(key = %key, "lock was already released or taken over");
        }

        Ok(())
    }

    async fn write_conditional(
        &self,
        key: &StoreKey,
        content: &[u8],
        token: &str,
    ) -> AppResult<()> {
        let result = bounded(self.operation_timeout, "write", key, async {
            sqlx::query(
                r#"
                UPDATE lease_store_objects
                SET content = $3,
                    updated_at = now()
                WHERE namespace = $1
                    AND name = $2
                    AND lock_token = $4
                    AND lock_expires_at > now()
                "#,
            )
            .bind(key.namespace())
            .bind(key.name())
            .bind(content)
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(|error| classify_sqlx_error("write", key, &error))
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(lock_lost(key, token));
        }

        Ok(())
    }

    async fn delete(&self, key: &StoreKey) -> AppResult<()> {
        bounded(self.operation_timeout, "delete", key, async {
            sqlx::query(
                r#"
                DELETE FROM lease_store_objects
                WHERE namespace = $1 AND name = $2
                "#,
            )
            .bind(key.namespace())
            .bind(key.name())
            .execute(&self.pool)
            .await
            .map_err(|error| classify_sqlx_error("delete", key, &error))
        })
        .await?;

        Ok(())
    }
}
