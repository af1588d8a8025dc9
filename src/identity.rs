//! Identity backend integration.
//!
//! The gate talks to the hosted identity service only through the
//! [`IdentityBackend`] trait, so tests and alternative providers can stand in.

pub mod hosted;
mod session;

pub use hosted::HostedIdentity;
pub use session::{StoredSession, decode_session, encode_session};

use crate::config::Result;
use crate::core::middleware::{CookieSet, SessionCookie};
use async_trait::async_trait;
use serde::Deserialize;

/// Authenticated user as reported by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Refreshes the session carried by `cookies` and returns the cookie
    /// writes it requires. Safe to call on every request.
    async fn refresh_session(&self, cookies: &CookieSet) -> Result<Vec<SessionCookie>>;

    /// Looks up the user for `cookies`. `Ok(None)` is the anonymous result.
    async fn get_current_user(&self, cookies: &CookieSet) -> Result<Option<User>>;

    /// Bearer token for data API calls made on behalf of the user.
    fn access_token(&self, _cookies: &CookieSet) -> Option<String> {
        None
    }
}
