//! Google Calendar backend for calmesh.
//!
//! [`Session`] owns the OAuth tokens and refreshes them, [`GoogleClient`]
//! implements the v3 REST calls, and [`GoogleRemote`] adapts it to
//! `CalendarRemote`.

pub mod api;
pub mod convert;
pub mod remote;
pub mod session;
pub mod types;

pub use api::GoogleClient;
pub use remote::GoogleRemote;
pub use session::{NoopRefreshHook, Session, TokenRefreshHook};
pub use types::{GoogleConfig, GoogleTokens};
