//! Hosted identity client.
//!
//! Talks to a GoTrue-style auth API: exchanges refresh tokens when the stored
//! session is about to expire and resolves the current user from the access
//! token.

use crate::config::{Config, GateError, Result};
use crate::core::middleware::{CookieOptions, CookieSet, SessionCookie, chunk_cookies, clear_chunked};
use crate::identity::session::{StoredSession, decode_session, encode_session};
use crate::identity::{IdentityBackend, User};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

pub struct HostedIdentity {
    client: Client,
    base_url: String,
    api_key: String,
    cookie_name: String,
    cookie_options: CookieOptions,
    refresh_margin_secs: u64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl HostedIdentity {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_millis(config.identity_timeout_ms))
                .build()
                .unwrap_or_default(),
            base_url: config.identity_url.trim_end_matches('/').to_string(),
            api_key: config.identity_api_key.clone(),
            cookie_name: config.auth_cookie_name.clone(),
            cookie_options: config.cookie_options(),
            refresh_margin_secs: config.refresh_margin_secs,
        }
    }

    /// Decodes the session stored in `cookies`, if any.
    #[must_use]
    pub fn stored_session(&self, cookies: &CookieSet) -> Option<StoredSession> {
        cookies
            .chunked_value(&self.cookie_name)
            .and_then(|value| decode_session(&value))
    }

    /// Cookie writes that store `session`, replacing whatever layout `existing` had.
    ///
    /// # Errors
    ///
    /// Returns `GateError::Identity` if the session cannot be encoded.
    pub fn session_cookies(
        &self,
        session: &StoredSession,
        existing: &CookieSet,
    ) -> Result<Vec<SessionCookie>> {
        let value = encode_session(session)?;
        Ok(chunk_cookies(
            &self.cookie_name,
            &value,
            &self.cookie_options,
            existing,
        ))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Exchanges a refresh token. `Ok(None)` means the service rejected the
    /// token and the session is over.
    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<Option<StoredSession>> {
        let resp = self
            .client
            .post(self.endpoint("/auth/v1/token?grant_type=refresh_token"))
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| GateError::Identity(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => {
                let session = resp
                    .json::<StoredSession>()
                    .await
                    .map_err(|e| GateError::Identity(e.to_string()))?;
                Ok(Some(session.normalized(unix_now())))
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Ok(None),
            s => Err(GateError::Identity(format!("token refresh returned {s}"))),
        }
    }
}

#[async_trait]
impl IdentityBackend for HostedIdentity {
    async fn refresh_session(&self, cookies: &CookieSet) -> Result<Vec<SessionCookie>> {
        let Some(session) = self.stored_session(cookies) else {
            return Ok(Vec::new());
        };

        if !session.needs_refresh(unix_now(), self.refresh_margin_secs) {
            return Ok(Vec::new());
        }

        match self.exchange_refresh_token(&session.refresh_token).await? {
            Some(fresh) => {
                debug!(expires_at = ?fresh.expires_at, "Session refreshed");
                self.session_cookies(&fresh, cookies)
            }
            None => {
                debug!("Refresh token rejected, clearing session cookies");
                Ok(clear_chunked(
                    &self.cookie_name,
                    &self.cookie_options,
                    cookies,
                ))
            }
        }
    }

    async fn get_current_user(&self, cookies: &CookieSet) -> Result<Option<User>> {
        let Some(session) = self.stored_session(cookies) else {
            return Ok(None);
        };

        let resp = self
            .client
            .get(self.endpoint("/auth/v1/user"))
            .header("apikey", &self.api_key)
            .bearer_auth(&session.access_token)
            .send()
            .await
            .map_err(|e| GateError::Identity(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => resp
                .json::<User>()
                .await
                .map(Some)
                .map_err(|e| GateError::Identity(e.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            s => Err(GateError::Identity(format!("user lookup returned {s}"))),
        }
    }

    fn access_token(&self, cookies: &CookieSet) -> Option<String> {
        self.stored_session(cookies).map(|s| s.access_token)
    }
}
