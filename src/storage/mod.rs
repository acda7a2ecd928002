//! Durable key-value storage for the persisted session.
//!
//! The session lives under two fixed keys: [`TOKEN_KEY`] holds the raw
//! bearer token and [`USER_KEY`] holds the JSON-serialized profile. Both are
//! read, written and removed together through the batched methods.

pub mod sqlite;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

pub use sqlite::SqliteKeyValueStore;

/// Key holding the raw bearer token.
pub const TOKEN_KEY: &str = "userToken";

/// Key holding the JSON-serialized user profile.
pub const USER_KEY: &str = "user";

/// Async key-value persistence, modeled on mobile secure/async storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch several keys in one round trip. The result has one slot per
    /// requested key, in order.
    async fn get_many(&self, keys: &[&str]) -> anyhow::Result<Vec<Option<String>>>;

    /// Write several entries as one batch.
    async fn set_many(&self, entries: &[(&str, String)]) -> anyhow::Result<()>;

    /// Remove several keys as one batch. Missing keys are not an error.
    async fn remove_many(&self, keys: &[&str]) -> anyhow::Result<()>;

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.get_many(&[key]).await?.into_iter().next().flatten())
    }

    async fn set(&self, key: &str, value: String) -> anyhow::Result<()> {
        self.set_many(&[(key, value)]).await
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.remove_many(&[key]).await
    }
}

// ── In-memory backend ───────────────────────────────────────────

/// Process-local store. Nothing survives a restart; used for ephemeral
/// sessions and tests.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get_many(&self, keys: &[&str]) -> anyhow::Result<Vec<Option<String>>> {
        let entries = self.entries.lock();
        Ok(keys.iter().map(|k| entries.get(*k).cloned()).collect())
    }

    async fn set_many(&self, new_entries: &[(&str, String)]) -> anyhow::Result<()> {
        let mut entries = self.entries.lock();
        for (key, value) in new_entries {
            entries.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }

    async fn remove_many(&self, keys: &[&str]) -> anyhow::Result<()> {
        let mut entries = self.entries.lock();
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}
