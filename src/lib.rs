#![forbid(unsafe_code)]

//! session-keeper: client-side session state for mobile and desktop apps.
//!
//! One [`SessionStore`] owns the signed-in user and their bearer token and
//! keeps three places in agreement:
//! - the in-memory snapshot that UI code reads and subscribes to,
//! - durable key-value storage ([`storage`]),
//! - the default headers of the outgoing HTTP client ([`api::RequestDefaults`]).
//!
//! All collaborators are traits injected at construction, so an app wires
//! real implementations and tests wire doubles.

pub mod api;
pub mod cache;
pub mod config;
pub mod session;
pub mod storage;

pub use api::{AuthApi, HeaderSink, HttpAuthApi, RequestDefaults};
pub use cache::{CacheInvalidator, NoopInvalidator};
pub use config::SessionConfig;
pub use session::{
    AuthResponse, RefreshOutcome, SessionError, SessionSnapshot, SessionStore, UserProfile,
};
pub use storage::{KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore};

use std::sync::Arc;

/// Wire a [`SessionStore`] from configuration: HTTP auth API, SQLite
/// storage under `data_dir`, and one shared header map.
pub fn build_session_store(config: &SessionConfig) -> anyhow::Result<SessionStore> {
    let defaults = RequestDefaults::new();
    let api = HttpAuthApi::from_config(config, defaults.clone())?;
    let storage = SqliteKeyValueStore::new(&config.database_path())?;
    Ok(SessionStore::new(
        Arc::new(api),
        Arc::new(storage),
        Arc::new(defaults),
    ))
}
