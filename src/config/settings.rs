//! Configuration settings.
//!
//! Defines the main `Config` struct and environment variable loading logic.

use crate::core::gate::routes::{
    DEFAULT_EXCLUDED_EXTENSIONS, DEFAULT_EXCLUDED_PREFIXES, DEFAULT_LOGIN_PATH,
    DEFAULT_PROTECTED_PREFIXES, RouteRules,
};
use crate::core::middleware::{CookieOptions, SameSite};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

fn get_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} must be set in environment"))
}

fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_env_bool(key: &str) -> bool {
    env::var(key)
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(false)
}

fn get_env_u64_or(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn get_env_list_or(key: &str, default: &[&str]) -> Vec<String> {
    env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map_or_else(
            || default.iter().map(|s| (*s).to_string()).collect(),
            |s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            },
        )
}

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the gate listens on.
    pub listen_addr: SocketAddr,
    /// Page renderer that allowed requests are forwarded to.
    pub backend_url: String,
    /// Base URL of the hosted identity/data service.
    pub identity_url: String,
    /// Public API key sent with every identity/data request.
    pub identity_api_key: String,
    /// Upper bound for a single identity call, in milliseconds.
    pub identity_timeout_ms: u64,
    /// Logical name of the session cookie (chunks are `name.0`, `name.1`, ...).
    pub auth_cookie_name: String,
    /// Refresh the session when it expires within this many seconds.
    pub refresh_margin_secs: u64,
    /// `Max-Age` written on session cookies.
    pub cookie_max_age_secs: u64,
    /// Whether session cookies carry the `Secure` attribute.
    pub cookie_secure: bool,
    /// Protected prefixes, excluded asset paths and the login target.
    pub routes: RouteRules,
    /// Form action path for report status changes.
    pub report_status_path: String,
    /// Table holding report rows in the data API.
    pub reports_table: String,
    /// Logging format: "json" or "pretty".
    pub log_format: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// # Panics
    ///
    /// Panics if any of the following environment variables are missing or invalid:
    /// - `LISTEN_ADDR` (must be a valid socket address)
    /// - `BACKEND_URL` (must be set)
    /// - `IDENTITY_URL` (must be set)
    /// - `IDENTITY_API_KEY` (must be set)
    /// - `LOGIN_PATH`, `PROTECTED_PREFIXES`, `EXCLUDED_PREFIXES` (paths must start with `/`)
    #[must_use]
    pub fn from_env() -> Arc<Self> {
        let listen_addr = get_env_or("LISTEN_ADDR", "0.0.0.0:8080")
            .parse()
            .expect("LISTEN_ADDR must be a valid socket address");

        let routes = RouteRules::new(
            get_env_list_or("PROTECTED_PREFIXES", &DEFAULT_PROTECTED_PREFIXES),
            get_env_list_or("EXCLUDED_PREFIXES", &DEFAULT_EXCLUDED_PREFIXES),
            get_env_list_or("EXCLUDED_EXTENSIONS", &DEFAULT_EXCLUDED_EXTENSIONS),
            get_env_or("LOGIN_PATH", DEFAULT_LOGIN_PATH),
        )
        .unwrap_or_else(|e| panic!("invalid route rules: {e}"));

        Arc::new(Self {
            listen_addr,
            backend_url: get_env("BACKEND_URL"),
            identity_url: get_env("IDENTITY_URL"),
            identity_api_key: get_env("IDENTITY_API_KEY"),
            identity_timeout_ms: get_env_u64_or("IDENTITY_TIMEOUT_MS", 5000),
            auth_cookie_name: get_env_or("AUTH_COOKIE_NAME", "sb-auth-token"),
            refresh_margin_secs: get_env_u64_or("REFRESH_MARGIN_SECS", 60),
            cookie_max_age_secs: get_env_u64_or("COOKIE_MAX_AGE_SECS", 400 * 24 * 60 * 60),
            cookie_secure: get_env_bool("COOKIE_SECURE"),
            routes,
            report_status_path: get_env_or("REPORT_STATUS_PATH", "/reports/status"),
            reports_table: get_env_or("REPORTS_TABLE", "reports"),
            log_format: get_env_or("LOG_FORMAT", "json"),
        })
    }

    /// Attributes written on every session cookie.
    #[must_use]
    pub fn cookie_options(&self) -> CookieOptions {
        CookieOptions {
            path: Some("/".to_string()),
            domain: None,
            max_age: Some(self.cookie_max_age_secs),
            http_only: true,
            secure: self.cookie_secure,
            same_site: Some(SameSite::Lax),
        }
    }
}
