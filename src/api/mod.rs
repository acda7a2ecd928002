//! Remote authentication API and the shared request headers.
//!
//! [`AuthApi`] is the narrow interface the session store talks to; the
//! production implementation is [`HttpAuthApi`]. [`HeaderSink`] is the seam
//! through which the store installs and removes the bearer token on the
//! outgoing client, implemented by [`RequestDefaults`].

pub mod headers;
pub mod http;

use crate::session::{AuthResponse, UserProfile};
use async_trait::async_trait;
use serde_json::{Map, Value};

pub use headers::{HeaderSink, RequestDefaults};
pub use http::HttpAuthApi;

/// Remote authentication endpoints.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> anyhow::Result<AuthResponse>;

    async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        professional_path: Option<&str>,
    ) -> anyhow::Result<AuthResponse>;

    /// Invalidate the current token server-side.
    async fn logout(&self) -> anyhow::Result<()>;

    /// Fetch the profile for the token currently installed in the request
    /// headers. Fails if the server rejects the token or returns no user.
    async fn get_current_user(&self) -> anyhow::Result<UserProfile>;

    /// Record the onboarding choices. Returns the profile fields the server
    /// changed, to be merged into the local record.
    async fn update_onboarding(
        &self,
        professional_path: &str,
        pinned_modules: &[String],
    ) -> anyhow::Result<Map<String, Value>>;
}
