//! Key-value persistence
//!
//! Small JSON blobs by string key, last-write-wins per key. The SQLite store
//! is durable across restarts; the memory store backs tests and dry runs.

use async_trait::async_trait;
use muxbot_common::{Error, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Durable JSON key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Stored value, or None if the key was never set (or was removed)
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Overwrite the value stored under `key`
    async fn set(&self, key: &str, value: &Value) -> Result<()>;

    /// Delete `key`; removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<()>;
}

/// SQLite-backed store using the `kv_store` table
#[derive(Clone)]
pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db)
            .await
            .map_err(Error::Database)?;

        match row {
            Some((text,)) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value)?;
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(text)
        .bind(muxbot_common::time::now().to_rfc3339())
        .execute(&self.db)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.db)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}

/// Process-local store
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
