use rusqlite::{OptionalExtension, params};
use tracing::warn;

use super::Store;
use crate::error::QueueError;
use crate::queue::DEFAULT_BACKOFF_BASE;

pub const MAX_RETRIES_KEY: &str = "max_retries";
pub const BACKOFF_BASE_KEY: &str = "backoff_base";

/// Default retry ceiling for jobs submitted without `max_retries`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Process-wide key/value queue configuration.
///
/// Values are read through on every call; nothing is cached, so a `config set`
/// from another process takes effect on the next read.
pub trait ConfigProvider {
    fn get(&self, key: &str) -> Result<Option<String>, QueueError>;

    /// Replaces the value for `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), QueueError>;

    fn max_retries(&self) -> u32 {
        read_positive(self, MAX_RETRIES_KEY, DEFAULT_MAX_RETRIES)
    }

    fn backoff_base(&self) -> u64 {
        read_positive(self, BACKOFF_BASE_KEY, DEFAULT_BACKOFF_BASE)
    }
}

fn read_positive<C, T>(config: &C, key: &str, default: T) -> T
where
    C: ConfigProvider + ?Sized,
    T: std::str::FromStr + PartialOrd + From<u8> + Copy,
{
    match config.get(key) {
        Ok(Some(raw)) => match raw.trim().parse::<T>() {
            Ok(value) if value >= T::from(1) => value,
            _ => {
                warn!(key, value = %raw, "ignoring invalid config value, using default");
                default
            }
        },
        Ok(None) => default,
        Err(e) => {
            warn!(key, error = %e, "failed to read config, using default");
            default
        }
    }
}

/// Rejects values the typed readers would ignore.
pub fn validate(key: &str, value: &str) -> Result<(), QueueError> {
    let ok = match key {
        MAX_RETRIES_KEY => value.trim().parse::<u32>().is_ok_and(|n| n >= 1),
        BACKOFF_BASE_KEY => value.trim().parse::<u64>().is_ok_and(|n| n >= 1),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(QueueError::Config(format!(
            "'{key}' must be a positive integer, got '{value}'"
        )))
    }
}

impl ConfigProvider for Store {
    fn get(&self, key: &str) -> Result<Option<String>, QueueError> {
        self.with_retry(|conn| {
            conn.query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), QueueError> {
        validate(key, value)?;
        self.with_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
        })?;
        Ok(())
    }
}
