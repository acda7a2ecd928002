use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::sync::Arc;

/// Where the session store installs the bearer token for outgoing requests.
pub trait HeaderSink: Send + Sync {
    /// Set `Authorization: Bearer <token>`.
    fn set_bearer(&self, token: &str) -> anyhow::Result<()>;

    /// Remove the `Authorization` header. Idempotent.
    fn clear_bearer(&self);
}

/// Default headers attached to every request made by [`HttpAuthApi`](super::HttpAuthApi).
///
/// Cheap to clone; all clones share one header map.
#[derive(Debug, Clone, Default)]
pub struct RequestDefaults {
    headers: Arc<RwLock<HeaderMap>>,
}

impl RequestDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current header map.
    pub fn snapshot(&self) -> HeaderMap {
        self.headers.read().clone()
    }

    /// Attach the current default headers to a request.
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.headers(self.snapshot())
    }

    /// Current `Authorization` header value, if any.
    pub fn authorization(&self) -> Option<String> {
        self.headers
            .read()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

impl HeaderSink for RequestDefaults {
    fn set_bearer(&self, token: &str) -> anyhow::Result<()> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| anyhow::anyhow!("token contains characters not allowed in a header"))?;
        value.set_sensitive(true);
        self.headers.write().insert(AUTHORIZATION, value);
        Ok(())
    }

    fn clear_bearer(&self) {
        self.headers.write().remove(AUTHORIZATION);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_set_and_clear() {
        let defaults = RequestDefaults::new();
        assert!(defaults.authorization().is_none());

        defaults.set_bearer("t1").unwrap();
        assert_eq!(defaults.authorization().as_deref(), Some("Bearer t1"));

        defaults.clear_bearer();
        assert!(defaults.authorization().is_none());
        defaults.clear_bearer();
    }

    #[test]
    fn clones_share_headers() {
        let defaults = RequestDefaults::new();
        let clone = defaults.clone();
        clone.set_bearer("shared").unwrap();
        assert_eq!(defaults.authorization().as_deref(), Some("Bearer shared"));
    }

    #[test]
    fn bearer_rejects_control_characters() {
        let defaults = RequestDefaults::new();
        assert!(defaults.set_bearer("bad\ntoken").is_err());
        assert!(defaults.authorization().is_none());
    }

    #[test]
    fn bearer_value_is_marked_sensitive() {
        let defaults = RequestDefaults::new();
        defaults.set_bearer("t1").unwrap();
        assert!(defaults.snapshot().get(AUTHORIZATION).unwrap().is_sensitive());
    }
}
