//! The session store: one authenticated session, kept consistent across
//! memory, durable storage and the outgoing request headers.
//!
//! State lives in a `tokio::sync::watch` channel. Every mutation is a short
//! closure run under the channel's lock and never spans an `.await`, so
//! operations interleave only at I/O boundaries. The bearer header is
//! written inside the same closures, so memory and header cannot be torn
//! apart by a racing operation. Subscribers are woken only when the
//! snapshot actually changes.

use super::{AuthResponse, RefreshOutcome, SessionError, SessionSnapshot, UserProfile};
use crate::api::{AuthApi, HeaderSink};
use crate::cache::{CacheInvalidator, NoopInvalidator};
use crate::storage::{KeyValueStore, TOKEN_KEY, USER_KEY};
use anyhow::Context;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Client-side authentication state plus the operations that change it.
///
/// Construct one per application (or per test), share it behind an `Arc`,
/// and call [`restore`](Self::restore) once at startup.
pub struct SessionStore {
    api: Arc<dyn AuthApi>,
    storage: Arc<dyn KeyValueStore>,
    headers: Arc<dyn HeaderSink>,
    cache: Arc<dyn CacheInvalidator>,
    state: watch::Sender<SessionSnapshot>,
    /// Number of busy operations in flight. Only touched inside `state`
    /// closures, so it is serialized with the `is_refreshing` flag.
    in_flight: AtomicUsize,
    /// Bumped inside `state` closures whenever a session is installed or
    /// cleared. Work that started under an older generation must not
    /// write its result.
    generation: AtomicU64,
    restored: AtomicBool,
}

impl SessionStore {
    pub fn new(
        api: Arc<dyn AuthApi>,
        storage: Arc<dyn KeyValueStore>,
        headers: Arc<dyn HeaderSink>,
    ) -> Self {
        Self {
            api,
            storage,
            headers,
            cache: Arc::new(NoopInvalidator),
            state: watch::Sender::new(SessionSnapshot::default()),
            in_flight: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            restored: AtomicBool::new(false),
        }
    }

    /// Attach the cache to invalidate when the professional path changes.
    pub fn with_cache_invalidator(mut self, cache: Arc<dyn CacheInvalidator>) -> Self {
        self.cache = cache;
        self
    }

    // ── Read side ───────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Receiver that is notified whenever any snapshot field changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.state.borrow().user.clone()
    }

    pub fn token(&self) -> Option<String> {
        self.state.borrow().token.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn is_refreshing(&self) -> bool {
        self.state.borrow().is_refreshing
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn is_onboarding_completed(&self) -> bool {
        self.state.borrow().is_onboarding_completed()
    }

    // ── Startup ─────────────────────────────────────────────────

    /// Load the persisted session and verify it with the server.
    ///
    /// Runs once; later calls return immediately. Never fails: a stored
    /// session that cannot be read or is rejected is cleared. A login or
    /// logout that completes while this runs takes precedence over it.
    /// `loading` drops to false when this returns.
    pub async fn restore(&self) {
        if self.restored.swap(true, Ordering::SeqCst) {
            return;
        }

        let generation = self.generation.load(Ordering::SeqCst);
        match self.restore_stored(generation).await {
            Ok(()) => {}
            Err(e) if self.generation.load(Ordering::SeqCst) != generation => {
                tracing::debug!("Session changed during restore, keeping it: {e:#}");
            }
            Err(e) => {
                tracing::warn!("Stored session could not be restored, clearing: {e:#}");
                self.clear_logged().await;
            }
        }

        self.update(|s| s.loading = false);
    }

    async fn restore_stored(&self, generation: u64) -> anyhow::Result<()> {
        let stored = self
            .storage
            .get_many(&[TOKEN_KEY, USER_KEY])
            .await
            .context("Failed to read stored session")?;
        let mut stored = stored.into_iter();
        let token = stored.next().flatten().filter(|t| !t.is_empty());
        let user = stored.next().flatten().filter(|u| !u.is_empty());

        let (Some(token), Some(_)) = (token, user) else {
            tracing::info!("No stored session found");
            return Ok(());
        };

        // Header and generation are checked together so a session installed
        // during the storage read keeps its header.
        let mut installed = Ok(false);
        self.state.send_if_modified(|_| {
            if self.generation.load(Ordering::SeqCst) == generation {
                installed = self.headers.set_bearer(&token).map(|()| true);
            }
            false
        });
        if !installed? {
            tracing::debug!("Session changed during restore, discarding stored session");
            return Ok(());
        }

        let user = self
            .api
            .get_current_user()
            .await
            .context("Stored token was not accepted")?;

        let mut applied = false;
        self.update(|s| {
            if self.generation.load(Ordering::SeqCst) == generation {
                s.token = Some(token);
                s.user = Some(user.clone());
                applied = true;
            }
        });
        if !applied {
            tracing::debug!("Session changed during restore, discarding stored session");
            return Ok(());
        }
        self.persist_user(&user).await;

        tracing::info!("Restored stored session");
        Ok(())
    }

    // ── Authentication ──────────────────────────────────────────

    /// Log in and install the returned session. On any failure the session
    /// is cleared and the original error returned.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, SessionError> {
        let _busy = self.begin_busy();
        let outcome = self.api.login(email, password).await;
        self.establish("login", outcome).await
    }

    /// Register a new account and install the returned session. Same
    /// contract as [`login`](Self::login).
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        professional_path: Option<&str>,
    ) -> Result<AuthResponse, SessionError> {
        let _busy = self.begin_busy();
        let outcome = self
            .api
            .register(name, email, password, professional_path)
            .await;
        self.establish("register", outcome).await
    }

    /// Tell the server (best effort) and clear the local session. Never fails.
    pub async fn logout(&self) {
        let _busy = self.begin_busy();

        let has_token = self.state.borrow().token.is_some();
        if has_token {
            if let Err(e) = self.api.logout().await {
                tracing::warn!("Logout API call failed: {e:#}");
            }
        }

        self.clear_logged().await;
        tracing::info!("Logged out");
    }

    /// Re-validate the current token by fetching the profile.
    ///
    /// Skipped when there is no token or another session operation is in
    /// flight. A rejected token clears the session. Never fails; the
    /// outcome says what happened.
    pub async fn refresh_token(&self) -> RefreshOutcome {
        let Some((_busy, token)) = self.try_begin_refresh() else {
            tracing::debug!("Token refresh skipped");
            return RefreshOutcome::Skipped;
        };

        match self.api.get_current_user().await {
            Ok(user) => {
                if !self.replace_user_if_token(&token, &user) {
                    tracing::debug!("Session changed during refresh, discarding result");
                    return RefreshOutcome::Skipped;
                }
                self.persist_user(&user).await;
                RefreshOutcome::Refreshed
            }
            Err(e) => {
                tracing::error!("Token refresh failed: {e:#}");
                let still_current = self.state.borrow().token.as_deref() == Some(token.as_str());
                if !still_current {
                    return RefreshOutcome::Skipped;
                }
                self.clear_logged().await;
                RefreshOutcome::Cleared
            }
        }
    }

    // ── Profile updates ─────────────────────────────────────────

    /// Set the professional path locally. Invalidates the category cache
    /// only when the value changes.
    pub async fn update_onboarding_path(
        &self,
        professional_path: &str,
    ) -> Result<UserProfile, SessionError> {
        let mut patch = Map::new();
        patch.insert(
            "professionalPath".into(),
            Value::String(professional_path.to_string()),
        );
        self.merge_user(&patch).await
    }

    /// Send the onboarding choices to the server and merge the result.
    ///
    /// Requires a professional path. A server failure is returned as-is
    /// and leaves the session untouched.
    pub async fn complete_onboarding(
        &self,
        pinned_modules: Vec<String>,
    ) -> Result<UserProfile, SessionError> {
        let professional_path = self
            .state
            .borrow()
            .user
            .as_ref()
            .and_then(|u| u.professional_path.clone())
            .filter(|p| !p.is_empty())
            .ok_or(SessionError::ProfessionalPathNotSelected)?;

        let _busy = self.begin_busy();
        let mut patch = self
            .api
            .update_onboarding(&professional_path, &pinned_modules)
            .await
            .map_err(|e| {
                tracing::error!("Failed to complete onboarding: {e:#}");
                SessionError::Api(e)
            })?;

        patch.insert("hasCompletedOnboarding".into(), Value::Bool(true));
        patch.insert("pinnedModules".into(), Value::from(pinned_modules));

        self.merge_user(&patch).await
    }

    /// Shallow-merge `partial` into the profile and persist it.
    pub async fn update_user(
        &self,
        partial: &Map<String, Value>,
    ) -> Result<UserProfile, SessionError> {
        self.merge_user(partial).await
    }

    async fn merge_user(&self, patch: &Map<String, Value>) -> Result<UserProfile, SessionError> {
        let previous = self.user().ok_or(SessionError::NoAuthenticatedUser)?;
        let updated = previous.merged_with(patch)?;

        let mut replaced = false;
        self.update(|s| {
            if s.user.is_some() {
                s.user = Some(updated.clone());
                replaced = true;
            }
        });
        if !replaced {
            return Err(SessionError::SessionCleared);
        }

        self.persist_user(&updated).await;

        if updated.professional_path != previous.professional_path {
            tracing::debug!("Professional path changed, invalidating category cache");
            self.cache.invalidate();
        }

        Ok(updated)
    }

    // ── Internals ───────────────────────────────────────────────

    /// Install a login/register result, or clear on failure.
    async fn establish(
        &self,
        action: &'static str,
        outcome: anyhow::Result<AuthResponse>,
    ) -> Result<AuthResponse, SessionError> {
        let result = match outcome {
            Ok(response) => self.install(&response).await.map(|()| response),
            Err(e) => Err(SessionError::Api(e)),
        };

        match &result {
            Ok(_) => tracing::info!(action, "Session established"),
            Err(e) => {
                tracing::error!(action, "Authentication failed: {e}");
                self.clear_logged().await;
            }
        }

        result
    }

    async fn install(&self, response: &AuthResponse) -> Result<(), SessionError> {
        let (token, user) = response
            .credentials()
            .ok_or(SessionError::MalformedResponse)?;
        let user_json = serde_json::to_string(user)?;

        let mut header = Ok(());
        self.update(|s| {
            header = self.headers.set_bearer(token);
            if header.is_ok() {
                self.generation.fetch_add(1, Ordering::SeqCst);
                s.token = Some(token.to_string());
                s.user = Some(user.clone());
            }
        });
        header.map_err(|e| SessionError::InvalidToken(e.to_string()))?;

        if let Err(e) = self
            .storage
            .set_many(&[(TOKEN_KEY, token.to_string()), (USER_KEY, user_json)])
            .await
        {
            tracing::error!("Failed to persist session: {e:#}");
        }

        Ok(())
    }

    /// Drop the session everywhere. Every step runs even if an earlier one
    /// fails; the storage error, if any, is returned.
    async fn clear(&self) -> anyhow::Result<()> {
        self.update(|s| {
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.headers.clear_bearer();
            s.user = None;
            s.token = None;
        });
        self.cache.invalidate();

        self.storage
            .remove_many(&[TOKEN_KEY, USER_KEY])
            .await
            .context("Failed to remove stored session")
    }

    async fn clear_logged(&self) {
        if let Err(e) = self.clear().await {
            tracing::error!("Error clearing auth data: {e:#}");
        }
    }

    async fn persist_user(&self, user: &UserProfile) {
        let result = match serde_json::to_string(user) {
            Ok(json) => self.storage.set(USER_KEY, json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::error!("Failed to persist user: {e:#}");
        }
    }

    fn replace_user_if_token(&self, token: &str, user: &UserProfile) -> bool {
        let mut replaced = false;
        self.update(|s| {
            if s.token.as_deref() == Some(token) {
                s.user = Some(user.clone());
                replaced = true;
            }
        });
        replaced
    }

    /// Apply `f` and notify subscribers only if the snapshot changed.
    fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut SessionSnapshot),
    {
        self.state.send_if_modified(|s| {
            let before = s.clone();
            f(s);
            *s != before
        });
    }

    fn begin_busy(&self) -> BusyGuard<'_> {
        self.state.send_if_modified(|s| {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            !std::mem::replace(&mut s.is_refreshing, true)
        });
        BusyGuard { store: self }
    }

    /// Check-and-set in one critical section: a token must be present and
    /// nothing else may be in flight.
    fn try_begin_refresh(&self) -> Option<(BusyGuard<'_>, String)> {
        let mut token = None;
        self.state.send_if_modified(|s| {
            if s.is_refreshing {
                return false;
            }
            let Some(current) = s.token.clone() else {
                return false;
            };
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            s.is_refreshing = true;
            token = Some(current);
            true
        });
        token.map(|t| (BusyGuard { store: self }, t))
    }
}

/// Keeps `is_refreshing` set until the last busy operation finishes.
struct BusyGuard<'a> {
    store: &'a SessionStore,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let in_flight = &self.store.in_flight;
        self.store.state.send_if_modified(|s| {
            if in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                s.is_refreshing = false;
                true
            } else {
                false
            }
        });
    }
}
