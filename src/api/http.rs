//! reqwest implementation of [`AuthApi`].
//!
//! Endpoints, relative to the configured base URL:
//! - `POST /auth/login`, `POST /auth/register` → `{ token, user, ... }`
//! - `POST /auth/logout`
//! - `GET /auth/me` → user object, bare or wrapped as `{ user: {...} }`
//! - `PUT /auth/onboarding` → changed profile fields
//!
//! Every request carries the shared [`RequestDefaults`], so the bearer token
//! installed by the session store is sent automatically.

use super::{AuthApi, RequestDefaults};
use crate::config::SessionConfig;
use crate::session::{AuthResponse, UserProfile};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

/// HTTP client for the remote auth endpoints.
pub struct HttpAuthApi {
    base_url: String,
    http: reqwest::Client,
    defaults: RequestDefaults,
}

impl HttpAuthApi {
    pub fn new(base_url: &str, timeout: Duration, defaults: RequestDefaults) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            bail!("Auth API base URL cannot be empty");
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url,
            http,
            defaults,
        })
    }

    pub fn from_config(config: &SessionConfig, defaults: RequestDefaults) -> Result<Self> {
        Self::new(&config.api_url, config.request_timeout(), defaults)
    }

    /// The header map this client sends with every request.
    pub fn defaults(&self) -> &RequestDefaults {
        &self.defaults
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request with the default headers. Non-2xx statuses become
    /// errors carrying the status and body.
    async fn send(&self, request: reqwest::RequestBuilder, action: &str) -> Result<String> {
        let resp = self
            .defaults
            .apply(request)
            .send()
            .await
            .with_context(|| format!("{action} request failed"))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            bail!("{action} failed ({status}): {body}");
        }

        Ok(body)
    }

    /// Like [`send`](Self::send), parsing the body as JSON. An empty body
    /// yields `Value::Null`.
    async fn send_json(&self, request: reqwest::RequestBuilder, action: &str) -> Result<Value> {
        let body = self.send(request, action).await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).with_context(|| format!("Invalid {action} response"))
    }
}

/// Unwrap an optional `{ "user": {...} }` envelope. A `user` key holding
/// anything but an object is rejected.
fn user_object(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(mut fields) => match fields.remove("user") {
            Some(Value::Object(user)) => Some(user),
            Some(_) => None,
            None => Some(fields),
        },
        _ => None,
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
        let request = self
            .http
            .post(self.url("/auth/login"))
            .json(&serde_json::json!({
                "email": email,
                "password": password,
            }));

        let body = self.send_json(request, "Login").await?;
        serde_json::from_value(body).context("Invalid login response")
    }

    async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        professional_path: Option<&str>,
    ) -> Result<AuthResponse> {
        let request = self
            .http
            .post(self.url("/auth/register"))
            .json(&serde_json::json!({
                "name": name,
                "email": email,
                "password": password,
                "professionalPath": professional_path,
            }));

        let body = self.send_json(request, "Registration").await?;
        serde_json::from_value(body).context("Invalid registration response")
    }

    async fn logout(&self) -> Result<()> {
        self.send(self.http.post(self.url("/auth/logout")), "Logout")
            .await?;
        Ok(())
    }

    async fn get_current_user(&self) -> Result<UserProfile> {
        let body = self
            .send_json(self.http.get(self.url("/auth/me")), "Current user")
            .await?;
        let fields = user_object(body).context("Invalid user data")?;
        serde_json::from_value(Value::Object(fields)).context("Invalid user data")
    }

    async fn update_onboarding(
        &self,
        professional_path: &str,
        pinned_modules: &[String],
    ) -> Result<Map<String, Value>> {
        let request = self
            .http
            .put(self.url("/auth/onboarding"))
            .json(&serde_json::json!({
                "professionalPath": professional_path,
                "pinnedModules": pinned_modules,
            }));

        match self.send_json(request, "Onboarding update").await? {
            Value::Null => Ok(Map::new()),
            body => user_object(body).context("Invalid onboarding response"),
        }
    }
}
