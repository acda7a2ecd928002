//! Session data model: the user profile, the login/register payload, and
//! the snapshot value published to subscribers.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ── User profile ────────────────────────────────────────────────

/// The authenticated user's profile.
///
/// Only the fields the session logic reads are typed. Everything else the
/// server sends (ids, names, settings, ...) lands in `extra` and is written
/// back out unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Category that decides which onboarding content applies.
    #[serde(default)]
    pub professional_path: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub has_completed_onboarding: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pinned_modules: Vec<String>,
    /// Opaque pass-through fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    /// Look up any field by its wire name, typed or opaque.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "professionalPath" => Some(
                self.professional_path
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            ),
            "hasCompletedOnboarding" => Some(Value::Bool(self.has_completed_onboarding)),
            "pinnedModules" => Some(Value::from(self.pinned_modules.clone())),
            other => self.extra.get(other).cloned(),
        }
    }

    /// Shallow merge: every key in `patch` overwrites the field of the same
    /// wire name. Fails if the result no longer parses as a profile (for
    /// example `pinnedModules` set to a number).
    pub fn merged_with(&self, patch: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(fields) = &mut value {
            for (key, field) in patch {
                fields.insert(key.clone(), field.clone());
            }
        }
        serde_json::from_value(value)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Auth payload ────────────────────────────────────────────────

/// Body returned by the login and register endpoints.
///
/// Both `token` and `user` are optional at the type level so that a
/// response missing one of them can be reported as malformed instead of
/// failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuthResponse {
    pub fn new(token: impl Into<String>, user: UserProfile) -> Self {
        Self {
            token: Some(token.into()),
            user: Some(user),
            extra: Map::new(),
        }
    }

    /// The token/user pair, or `None` unless both are present and the
    /// token is non-empty.
    pub fn credentials(&self) -> Option<(&str, &UserProfile)> {
        let token = self.token.as_deref().filter(|t| !t.is_empty())?;
        let user = self.user.as_ref()?;
        Some((token, user))
    }
}

// ── Snapshot ────────────────────────────────────────────────────

/// Point-in-time view of the session, as published to subscribers.
#[derive(Clone, PartialEq)]
pub struct SessionSnapshot {
    pub user: Option<UserProfile>,
    pub token: Option<String>,
    /// True until the startup restore has finished.
    pub loading: bool,
    /// True while a login, register, logout, refresh or onboarding
    /// completion is in flight.
    pub is_refreshing: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            user: None,
            token: None,
            loading: true,
            is_refreshing: false,
        }
    }
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.token.is_some()
    }

    pub fn is_onboarding_completed(&self) -> bool {
        self.user
            .as_ref()
            .is_some_and(|u| u.has_completed_onboarding)
    }
}

impl fmt::Debug for SessionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSnapshot")
            .field("user", &self.user)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("loading", &self.loading)
            .field("is_refreshing", &self.is_refreshing)
            .finish()
    }
}

// ── Refresh outcome ─────────────────────────────────────────────

/// Result of [`SessionStore::refresh_token`](super::SessionStore::refresh_token).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Nothing to do: no token, another operation in flight, or the
    /// session changed while the request was pending.
    Skipped,
    /// The server accepted the token and the profile was updated.
    Refreshed,
    /// The server rejected the token; the session was cleared.
    Cleared,
}

impl RefreshOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Refreshed)
    }
}
