//! Key/value configuration table.
//!
//! Backs `queuectl config set/view`; nothing in the job lifecycle reads it.

use sqlx::SqlitePool;

/// Set `key` to `value`, overwriting any previous value.
pub async fn set(pool: &SqlitePool, key: &str, value: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"
        INSERT INTO config (key, value) VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        ",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch the value stored under `key`, if any.
pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?1")
        .bind(key)
        .fetch_optional(pool)
        .await
}

/// All configuration entries, sorted by key.
pub async fn all(pool: &SqlitePool) -> Result<Vec<(String, String)>, sqlx::Error> {
    sqlx::query_as::<_, (String, String)>("SELECT key, value FROM config ORDER BY key")
        .fetch_all(pool)
        .await
}
