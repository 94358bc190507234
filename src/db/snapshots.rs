//! Snapshot store implementations.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use super::SnapshotStore;
use crate::errors::SyncError;

/// SQLite-backed snapshot store.
#[derive(Clone)]
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        let row = sqlx::query("SELECT value FROM snapshots WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("value")))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), SyncError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO snapshots (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM snapshots WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Process-local snapshot store, used when no database path is configured.
#[derive(Default)]
pub struct MemorySnapshotStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        Ok(self
            .blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), SyncError> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sqlite_store_overwrites_and_removes() {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database(&temp_dir.path().join("snapshots.db"))
            .await
            .unwrap();
        let store = SqliteSnapshotStore::new(pool);

        assert_eq!(store.get("cache_u-1").await.unwrap(), None);

        store.set("cache_u-1", b"first").await.unwrap();
        store.set("cache_u-1", b"second").await.unwrap();
        assert_eq!(store.get("cache_u-1").await.unwrap(), Some(b"second".to_vec()));

        store.remove("cache_u-1").await.unwrap();
        assert_eq!(store.get("cache_u-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("snapshots.db");

        {
            let store = SqliteSnapshotStore::new(init_database(&path).await.unwrap());
            store.set("cache_admin-1", b"{}").await.unwrap();
        }

        let store = SqliteSnapshotStore::new(init_database(&path).await.unwrap());
        assert_eq!(store.get("cache_admin-1").await.unwrap(), Some(b"{}".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySnapshotStore::new();
        store.set("k", b"v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }
}
