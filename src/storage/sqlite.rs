//! SQLite-backed key-value store.
//!
//! Table:
//! - `kv`: key, value, updated_at
//!
//! rusqlite is blocking, so every call hops onto the blocking pool.

use super::KeyValueStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::OptionalExtension;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// SQLite-backed key-value store.
pub struct SqliteKeyValueStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteKeyValueStore {
    /// Open (or create) the store at the given path.
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create data directory {}", parent.display())
                })?;
            }
        }

        let conn = rusqlite::Connection::open(db_path)
            .with_context(|| format!("Failed to open {}", db_path.display()))?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut *guard)
        })
        .await
        .context("SQLite task panicked")?
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        let keys: Vec<String> = keys.iter().map(|k| (*k).to_string()).collect();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
            let mut values = Vec::with_capacity(keys.len());
            for key in &keys {
                let value: Option<String> = stmt
                    .query_row(rusqlite::params![key], |row| row.get(0))
                    .optional()?;
                values.push(value);
            }
            Ok(values)
        })
        .await
    }

    async fn set_many(&self, entries: &[(&str, String)]) -> Result<()> {
        let entries: Vec<(String, String)> = entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        self.with_conn(move |conn| {
            let now = epoch_secs() as i64;
            let tx = conn.transaction()?;
            for (key, value) in &entries {
                tx.execute(
                    "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        updated_at = excluded.updated_at",
                    rusqlite::params![key, value, now],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn remove_many(&self, keys: &[&str]) -> Result<()> {
        let keys: Vec<String> = keys.iter().map(|k| (*k).to_string()).collect();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for key in &keys {
                tx.execute("DELETE FROM kv WHERE key = ?1", rusqlite::params![key])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{TOKEN_KEY, USER_KEY};
    use tempfile::TempDir;

    fn test_store() -> (TempDir, SqliteKeyValueStore) {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("session.db");
        let store = SqliteKeyValueStore::new(&db_path).unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn set_and_get_many() {
        let (_tmp, store) = test_store();

        store
            .set_many(&[(TOKEN_KEY, "t1".into()), (USER_KEY, r#"{"id":1}"#.into())])
            .await
            .unwrap();

        let values = store.get_many(&[TOKEN_KEY, USER_KEY]).await.unwrap();
        assert_eq!(values[0].as_deref(), Some("t1"));
        assert_eq!(values[1].as_deref(), Some(r#"{"id":1}"#));
    }

    #[tokio::test]
    async fn overwrite_existing_key() {
        let (_tmp, store) = test_store();

        store.set(TOKEN_KEY, "old".into()).await.unwrap();
        store.set(TOKEN_KEY, "new".into()).await.unwrap();

        assert_eq!(store.get(TOKEN_KEY).await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn remove_many_clears_both_keys() {
        let (_tmp, store) = test_store();

        store
            .set_many(&[(TOKEN_KEY, "t1".into()), (USER_KEY, "{}".into())])
            .await
            .unwrap();
        store.remove_many(&[TOKEN_KEY, USER_KEY]).await.unwrap();

        let values = store.get_many(&[TOKEN_KEY, USER_KEY]).await.unwrap();
        assert_eq!(values, vec![None, None]);
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested").join("session.db");

        {
            let store = SqliteKeyValueStore::new(&db_path).unwrap();
            store.set(TOKEN_KEY, "persisted".into()).await.unwrap();
        }

        let reopened = SqliteKeyValueStore::new(&db_path).unwrap();
        assert_eq!(
            reopened.get(TOKEN_KEY).await.unwrap().as_deref(),
            Some("persisted")
        );
    }
}
