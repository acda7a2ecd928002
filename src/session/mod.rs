//! Client-side authentication session.
//!
//! Provides:
//! - [`SessionStore`]: the single state container and its operations
//!   (login, register, logout, refresh, onboarding, profile updates)
//! - [`SessionSnapshot`]: the value published to subscribers
//! - [`UserProfile`] / [`AuthResponse`]: the records exchanged with the server
//!
//! ## Invariants
//! - A token is held if and only if a user is held. Any failure that would
//!   leave only one of them set clears both.
//! - Every change to the user or token is written through to the
//!   key-value store before the operation returns. Storage failures are
//!   logged, not raised.

mod error;
pub mod store;
mod types;

pub use error::SessionError;
pub use store::SessionStore;
pub use types::{AuthResponse, RefreshOutcome, SessionSnapshot, UserProfile};
