//! Settings database operations
//!
//! Key-value accessors over the `settings` table. The table is the
//! authoritative configuration tier; see `crate::config` for resolution.

use sqlx::{Pool, Sqlite};
use epa_common::{Error, Result};

/// Setting key bounding database lock retries
pub const DB_MAX_LOCK_WAIT_MS: &str = "db_max_lock_wait_ms";

/// Fallback lock wait when the setting is absent
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Maximum time database writes retry on lock contention
pub async fn max_lock_wait_ms(db: &Pool<Sqlite>) -> Result<u64> {
    get_setting(db, DB_MAX_LOCK_WAIT_MS)
        .await
        .map(|opt| opt.unwrap_or(DEFAULT_MAX_LOCK_WAIT_MS))
}

/// Raw string value of a setting
pub async fn get_raw(db: &Pool<Sqlite>, key: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    Ok(row.map(|(value,)| value))
}

/// Typed setting value; a stored value that fails to parse is a config error
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get_raw(db, key).await? {
        Some(value) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting {} failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}
