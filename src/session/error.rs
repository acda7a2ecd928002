/// Errors surfaced by [`SessionStore`](super::SessionStore) operations.
///
/// Transport and server failures from the auth API arrive as
/// `anyhow::Error` and pass through unchanged in [`SessionError::Api`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid response from server: missing token or user")]
    MalformedResponse,

    #[error("No authenticated user")]
    NoAuthenticatedUser,

    #[error("Professional path not selected")]
    ProfessionalPathNotSelected,

    #[error("Token cannot be sent as a bearer header: {0}")]
    InvalidToken(String),

    #[error("Session was cleared while the request was in flight")]
    SessionCleared,

    #[error("Invalid user record: {0}")]
    InvalidProfile(#[from] serde_json::Error),

    #[error(transparent)]
    Api(#[from] anyhow::Error),
}

impl SessionError {
    /// Precondition failures are raised before any state is touched.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NoAuthenticatedUser | Self::ProfessionalPathNotSelected
        )
    }
}
