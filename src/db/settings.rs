//! Key/value settings rows.
//!
//! The typed settings store with its TTL cache lives in
//! [`crate::settings`]; these are the raw persistence primitives it
//! builds on.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

impl Database {
    /// Read one setting value
    pub async fn setting(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to read setting: {}",
                        e
                    )))
                })?;

        Ok(value)
    }

    /// Write one setting value; upsert against the unique key
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to write setting: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Delete one setting
    pub async fn delete_setting(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete setting: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// All settings rows as (key, value) pairs
    pub async fn all_settings(&self) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM settings ORDER BY key ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to list settings: {}",
                        e
                    )))
                })?;

        Ok(rows)
    }
}
