//! Stored session codec.
//!
//! The session cookie holds the token pair as JSON, either raw or as
//! `base64-` followed by URL-safe unpadded base64.

use crate::config::{GateError, Result};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

const BASE64_PREFIX: &str = "base64-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing)]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl StoredSession {
    /// Fills `expires_at` from `expires_in` when the service only sent the latter.
    #[must_use]
    pub fn normalized(mut self, now: u64) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = self.expires_in.map(|secs| now.saturating_add(secs));
        }
        self.expires_in = None;
        self
    }

    /// True when the access token has expired or will within `margin` seconds.
    /// A session without an expiry is always refreshed.
    #[must_use]
    pub fn needs_refresh(&self, now: u64, margin: u64) -> bool {
        self.expires_at
            .is_none_or(|expires_at| expires_at <= now.saturating_add(margin))
    }
}

#[must_use]
pub fn decode_session(value: &str) -> Option<StoredSession> {
    if let Some(encoded) = value.strip_prefix(BASE64_PREFIX) {
        let bytes = URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')).ok()?;
        return serde_json::from_slice(&bytes).ok();
    }
    serde_json::from_str(value).ok()
}

/// Encodes a session for storage in the cookie.
///
/// # Errors
///
/// Returns `GateError::Identity` if the session cannot be serialized.
pub fn encode_session(session: &StoredSession) -> Result<String> {
    let json = serde_json::to_vec(session).map_err(|e| GateError::Identity(e.to_string()))?;
    Ok(format!("{BASE64_PREFIX}{}", URL_SAFE_NO_PAD.encode(json)))
}
