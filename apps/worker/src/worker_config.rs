use std::env;
use std::time::Duration;

use leasekeeper_application::{LeaseManagerConfig, RetryPolicy};
use leasekeeper_core::{AppError, AppResult};

/// Durable store selected by `LEASE_STORE_BACKEND`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis { url: String, key_prefix: String },
    Postgres { database_url: String },
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis { .. } => "redis",
            Self::Postgres { .. } => "postgres",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub backend: StoreBackend,
    pub source_path: String,
    pub consumer_group: String,
    pub worker_id: String,
    pub partition_ids: Vec<String>,
    pub lease: LeaseManagerConfig,
    pub renew_interval: Duration,
    pub poll_interval: Duration,
    pub max_owned_partitions: usize,
    pub store_timeout: Duration,
}

impl WorkerConfig {
    pub fn load() -> AppResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let env = EnvReader { lookup };

        let backend = match env
            .optional("LEASE_STORE_BACKEND")
            .unwrap_or_else(|| "memory".to_owned())
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "redis" => StoreBackend::Redis {
                url: env.required("REDIS_URL")?,
                key_prefix: env
                    .optional("LEASE_KEY_PREFIX")
                    .unwrap_or_else(|| "leasekeeper".to_owned()),
            },
            "postgres" => StoreBackend::Postgres {
                database_url: env.required("DATABASE_URL")?,
            },
            other => {
                return Err(AppError::Validation(format!(
                    "LEASE_STORE_BACKEND must be one of memory, redis, postgres; got '{other}'"
                )));
            }
        };

        let source_path = env.required("SOURCE_PATH")?;
        let consumer_group = env
            .optional("CONSUMER_GROUP")
            .unwrap_or_else(|| "$Default".to_owned());
        let worker_id = env
            .optional("WORKER_ID")
            .unwrap_or_else(|| format!("worker-{}", std::process::id()));
        let partition_ids = match env.optional("PARTITION_IDS") {
            Some(value) => parse_partition_ids(value.as_str())?,
            None => {
                let count = env.parse_u32("PARTITION_COUNT", 4)?;
                if count == 0 {
                    return Err(AppError::Validation(
                        "PARTITION_COUNT must be greater than zero".to_owned(),
                    ));
                }
                (0..count).map(|index| index.to_string()).collect()
            }
        };

        let lease_seconds = env.parse_u64("LEASE_SECONDS", 30)?;
        let retry_attempts = env.parse_u32("STORE_RETRY_MAX_ATTEMPTS", 3)?;
        let retry_policy = RetryPolicy::default().with_max_attempts(retry_attempts)?;
        let lease = LeaseManagerConfig::new(Duration::from_secs(lease_seconds), retry_policy)?;

        let renew_interval = match env.optional("RENEW_INTERVAL_MS") {
            Some(_) => Duration::from_millis(env.parse_u64("RENEW_INTERVAL_MS", 0)?),
            None => lease.renew_interval(),
        };
        if renew_interval.is_zero() || renew_interval >= lease.lease_duration() {
            return Err(AppError::Validation(format!(
                "RENEW_INTERVAL_MS must be positive and below LEASE_SECONDS ({lease_seconds}s)"
            )));
        }

        let poll_interval = Duration::from_millis(env.parse_u64("POLL_INTERVAL_MS", 10_000)?);
        if poll_interval.is_zero() {
            return Err(AppError::Validation(
                "POLL_INTERVAL_MS must be greater than zero".to_owned(),
            ));
        }

        let max_owned_partitions = env.parse_usize("MAX_OWNED_PARTITIONS", partition_ids.len())?;
        if max_owned_partitions == 0 {
            return Err(AppError::Validation(
                "MAX_OWNED_PARTITIONS must be greater than zero".to_owned(),
            ));
        }

        let store_timeout = Duration::from_millis(env.parse_u64("STORE_TIMEOUT_MS", 120_000)?);
        if store_timeout.is_zero() {
            return Err(AppError::Validation(
                "STORE_TIMEOUT_MS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            backend,
            source_path,
            consumer_group,
            worker_id,
            partition_ids,
            lease,
            renew_interval,
            poll_interval,
            max_owned_partitions,
            store_timeout,
        })
    }
}

fn parse_partition_ids(value: &str) -> AppResult<Vec<String>> {
    let mut partition_ids: Vec<String> = Vec::new();
    for partition_id in value.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        if !partition_ids.iter().any(|known| known == partition_id) {
            partition_ids.push(partition_id.to_owned());
        }
    }

    if partition_ids.is_empty() {
        return Err(AppError::Validation(
            "PARTITION_IDS must list at least one partition".to_owned(),
        ));
    }

    Ok(partition_ids)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &str) -> AppResult<String> {
        self.optional(name)
            .ok_or_else(|| AppError::Validation(format!("{name} is required")))
    }

    fn parse_u32(&self, name: &str, default: u32) -> AppResult<u32> {
        match self.optional(name) {
            Some(value) => value.parse::<u32>().map_err(|error| {
                AppError::Validation(format!("invalid {name} value '{value}': {error}"))
            }),
            None => Ok(default),
        }
    }

    fn parse_u64(&self, name: &str, default: u64) -> AppResult<u64> {
        match self.optional(name) {
            Some(value) => value.parse::<u64>().map_err(|error| {
                AppError::Validation(format!("invalid {name} value '{value}': {error}"))
            }),
            None => Ok(default),
        }
    }

    fn parse_usize(&self, name: &str, default: usize) -> AppResult<usize> {
        match self.optional(name) {
            Some(value) => value.parse::<usize>().map_err(|error| {
                AppError::Validation(format!("invalid {name} value '{value}': {error}"))
            }),
            None => Ok(default),
        }
    }
}
