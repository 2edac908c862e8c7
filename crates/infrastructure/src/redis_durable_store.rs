//! Redis-backed durable store with token-fenced expiring locks.

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use leasekeeper_application::{DurableStore, StoreLock, StoredObject};
use leasekeeper_core::{AppError, AppResult};
use leasekeeper_domain::StoreKey;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::debug;

use crate::store_errors::{
    DEFAULT_OPERATION_TIMEOUT, bounded, classify_redis_error, duration_millis,
};

const CREATE_OBJECT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[2]) == 0 then
  return -1
end
if redis.call('SET', KEYS[1], ARGV[1], 'NX') then
  return 1
end
return 0
"#;

const ACQUIRE_LOCK_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return -1
end
local current = redis.call('GET', KEYS[2])
if current and current ~= ARGV[4] then
  local holder = string.match(current, '^(.*):[^:]*$') or current
  if holder ~= ARGV[3] then
    return 0
  end
end
redis.call('SET', KEYS[2], ARGV[1], 'PX', ARGV[2])
return 1
"#;

const RENEW_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
  return 0
end
"#;

const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

const WRITE_CONDITIONAL_SCRIPT: &str = r#"
if redis.call('GET', KEYS[2]) ~= ARGV[1] then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2])
return 1
"#;

/// Redis implementation of the durable store port.
///
/// Each object lives at `{prefix}:{namespace}/{name}` with its lock at the
/// same key suffixed by `:lock`; lock expiry is the Redis key TTL.
#[derive(Clone)]
pub struct RedisDurableStore {
    client: redis::Client,
    key_prefix: String,
    operation_timeout: Duration,
}

impl RedisDurableStore {
    /// Creates one store adapter.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Overrides the per-call timeout.
    #[must_use]
    pub fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }

    fn namespace_key(&self, namespace: &str) -> String {
        format!("{}:{namespace}", self.key_prefix)
    }

    fn object_key(&self, key: &StoreKey) -> String {
        format!("{}:{key}", self.key_prefix)
    }

    fn lock_key(&self, key: &StoreKey) -> String {
        format!("{}:{key}:lock", self.key_prefix)
    }

    async fn connection(&self, target: impl Display) -> AppResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| classify_redis_error("connect for", target, &error))
    }
}

fn holder_of(token: &str) -> &str {
    token
        .rsplit_once(':')
        .map_or(token, |(holder_id, _)| holder_id)
}

#[async_trait]
impl DurableStore for RedisDurableStore {
    async fn namespace_exists(&self, namespace: &str) -> AppResult<bool> {
        bounded(self.operation_timeout, "check namespace", namespace, async {
            let mut connection = self.connection(namespace).await?;
            connection
                .exists::<_, bool>(self.namespace_key(namespace))
                .await
                .map_err(|error| classify_redis_error("check namespace", namespace, &error))
        })
        .await
    }

    async fn create_namespace_if_absent(&self, namespace: &str) -> AppResult<bool> {
        if namespace.trim().is_empty() {
            return Err(AppError::Validation(
                "store namespace must not be empty".to_owned(),
            ));
        }

        bounded(self.operation_timeout, "create namespace", namespace, async {
            let mut connection = self.connection(namespace).await?;
            connection
                .set_nx::<_, _, bool>(self.namespace_key(namespace), 1_u8)
                .await
                .map_err(|error| classify_redis_error("create namespace", namespace, &error))
        })
        .await
    }

    async fn exists(&self, key: &StoreKey) -> AppResult<bool> {
        bounded(self.operation_timeout, "check", key, async {
            let mut connection = self.connection(key).await?;
            connection
                .exists::<_, bool>(self.object_key(key))
                .await
                .map_err(|error| classify_redis_error("check", key, &error))
        })
        .await
    }

    async fn create_if_absent(&self, key: &StoreKey, content: &[u8]) -> AppResult<()> {
        let created = bounded(self.operation_timeout, "create", key, async {
            let mut connection = self.connection(key).await?;
            Script::new(CREATE_OBJECT_SCRIPT)
                .key(self.object_key(key))
                .key(self.namespace_key(key.namespace()))
                .arg(content.to_vec())
                .invoke_async::<i32>(&mut connection)
                .await
                .map_err(|error| classify_redis_error("create", key, &error))
        })
        .await?;

        match created {
            1 => Ok(()),
            0 => Err(AppError::AlreadyExists(format!("'{key}' already exists"))),
            _ => Err(AppError::Fatal(format!(
                "namespace '{}' does not exist",
                key.namespace()
            ))),
        }
    }

    async fn read(&self, key: &StoreKey) -> AppResult<Option<StoredObject>> {
        let (content, token) = bounded(self.operation_timeout, "read", key, async {
            let mut connection = self.connection(key).await?;
            redis::cmd("MGET")
                .arg(self.object_key(key))
                .arg(self.lock_key(key))
                .query_async::<(Option<Vec<u8>>, Option<String>)>(&mut connection)
                .await
                .map_err(|error| classify_redis_error("read", key, &error))
        })
        .await?;

        Ok(content.map(|content| StoredObject {
            content,
            lock: token.map(|token| StoreLock {
                holder_id: holder_of(token.as_str()).to_owned(),
                token,
            }),
        }))
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
        let acquired = bounded(self.operation_timeout, "acquire lock on", key, async {
            let mut connection = self.connection(key).await?;
            Script::new(ACQUIRE_LOCK_SCRIPT)
                .key(self.object_key(key))
                .key(self.lock_key(key))
                .arg(token.as_str())
                .arg(duration_millis(duration))
                .arg(holder_id)
                .arg(expected_token.unwrap_or_default())
                .invoke_async::<i32>(&mut connection)
                .await
                .map_err(|error| classify_redis_error("acquire lock on", key, &error))
        })
        .await?;

        match acquired {
            1 => Ok(token),
            0 => Err(AppError::Conflict(format!(
                "'{key}' is locked by another holder"
            ))),
            _ => Err(AppError::Fatal(format!("no object stored at '{key}'"))),
        }
    }

    async fn renew_lock(&self, key: &StoreKey, token: &str, duration: Duration) -> AppResult<()> {
        let renewed = bounded(self.operation_timeout, "renew lock on", key, async {
            let mut connection = self.connection(key).await?;
            Script::new(RENEW_LOCK_SCRIPT)
                .key(self.lock_key(key))
                .arg(token)
                .arg(duration_millis(duration))
                .invoke_async::<i32>(&mut connection)
                .await
                .map_err(|error| classify_redis_error("renew lock on", key, &error))
        })
        .await?;

        if renewed > 0 {
            Ok(())
        } else {
            Err(AppError::LockLost(format!(
                "'{key}' is no longer locked with token '{token}'"
            )))
        }
    }

    async fn release_lock(&self, key: &StoreKey, token: &str) -> AppResult<()> {
        let released = bounded(self.operation_timeout, "release lock on", key, async {
            let mut connection = self.connection(key).await?;
            Script::new(RELEASE_LOCK_SCRIPT)
                .key(self.lock_key(key))
                .arg(token)
                .invoke_async::<i32>(&mut connection)
                .await
                .map_err(|error| classify_redis_error("release lock on", key, &error))
        })
        .await?;

        if released == 0 {
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
        let written = bounded(self.operation_timeout, "write", key, async {
            let mut connection = self.connection(key).await?;
            Script::new(WRITE_CONDITIONAL_SCRIPT)
                .key(self.object_key(key))
                .key(self.lock_key(key))
                .arg(token)
                .arg(content.to_vec())
                .invoke_async::<i32>(&mut connection)
                .await
                .map_err(|error| classify_redis_error("write", key, &error))
        })
        .await?;

        if written > 0 {
            Ok(())
        } else {
            Err(AppError::LockLost(format!(
                "'{key}' is no longer locked with token '{token}'"
            )))
        }
    }

    async fn delete(&self, key: &StoreKey) -> AppResult<()> {
        bounded(self.operation_timeout, "delete", key, async {
            let mut connection = self.connection(key).await?;
            connection
                .del::<_, ()>(vec![self.object_key(key), self.lock_key(key)])
                .await
                .map_err(|error| classify_redis_error("delete", key, &error))
        })
        .await
    }
}
