//! Route classification.
//!
//! Decides which paths require an authenticated user and which paths never
//! enter the gate at all (framework build output and images).

use crate::config::{GateError, Result};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

pub const DEFAULT_PROTECTED_PREFIXES: [&str; 7] = [
    "/dashboard",
    "/stock",
    "/analytics",
    "/reports",
    "/settings",
    "/notifications",
    "/team",
];

pub const DEFAULT_EXCLUDED_PREFIXES: [&str; 3] = ["/_next/static", "/_next/image", "/favicon.ico"];

pub const DEFAULT_EXCLUDED_EXTENSIONS: [&str; 6] = ["svg", "png", "jpg", "jpeg", "gif", "webp"];

pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Query parameter carrying the originally requested path.
pub const NEXT_PARAM: &str = "next";

const NEXT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Immutable routing rules handed to the gate at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRules {
    protected_prefixes: Vec<String>,
    excluded_prefixes: Vec<String>,
    excluded_extensions: Vec<String>,
    login_path: String,
}

impl Default for RouteRules {
    fn default() -> Self {
        Self {
            protected_prefixes: to_owned(&DEFAULT_PROTECTED_PREFIXES),
            excluded_prefixes: to_owned(&DEFAULT_EXCLUDED_PREFIXES),
            excluded_extensions: to_owned(&DEFAULT_EXCLUDED_EXTENSIONS),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
        }
    }
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl RouteRules {
    /// Builds a rule set. Prefixes and the login path must be absolute.
    ///
    /// # Errors
    ///
    /// Returns `GateError::Config` if a prefix or the login path does not start with `/`.
    pub fn new(
        protected_prefixes: Vec<String>,
        excluded_prefixes: Vec<String>,
        excluded_extensions: Vec<String>,
        login_path: String,
    ) -> Result<Self> {
        for path in protected_prefixes
            .iter()
            .chain(&excluded_prefixes)
            .chain(std::iter::once(&login_path))
        {
            if !path.starts_with('/') {
                return Err(GateError::Config(format!("path must start with '/': {path}")));
            }
        }

        Ok(Self {
            protected_prefixes,
            excluded_prefixes,
            excluded_extensions: excluded_extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_string())
                .collect(),
            login_path,
        })
    }

    /// Plain string-prefix match, so `/dashboardish` counts as `/dashboard`.
    #[must_use]
    pub fn is_protected(&self, path: &str) -> bool {
        self.protected_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Paths the gate never runs on. Extensions match case-sensitively, so
    /// `/dashboard/Export.PNG` still goes through the gate.
    #[must_use]
    pub fn is_excluded(&self, path: &str) -> bool {
        if self
            .excluded_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return true;
        }

        std::path::Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.excluded_extensions.iter().any(|e| e == ext))
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// Login location carrying `path` as the return target. Only the path is
    /// kept; the original query string is dropped.
    #[must_use]
    pub fn login_redirect(&self, path: &str) -> String {
        let separator = if self.login_path.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}{NEXT_PARAM}={}",
            self.login_path,
            utf8_percent_encode(path, NEXT_ENCODE_SET)
        )
    }
}
