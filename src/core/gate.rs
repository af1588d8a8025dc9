//! Request gate.
//!
//! Runs before page rendering on every non-asset request:
//! 1. refreshes the session, mirroring every cookie write onto both the
//!    forwarded request and the outgoing response;
//! 2. classifies the path;
//! 3. for protected paths, requires a user and otherwise redirects to login.
//!
//! Identity faults deny protected paths and never block public ones.

pub mod routes;

pub use routes::RouteRules;

use crate::core::middleware::{CookieSet, SessionCookie};
use crate::identity::{IdentityBackend, User};
use http::{Method, Uri};
use std::sync::Arc;
use tracing::{debug, warn};

/// What the gate needs to know about an inbound request.
#[derive(Debug, Clone)]
pub struct GateRequest {
    pub method: Method,
    pub uri: Uri,
    pub cookies: CookieSet,
}

impl GateRequest {
    #[must_use]
    pub fn new(method: Method, uri: Uri, cookies: CookieSet) -> Self {
        Self {
            method,
            uri,
            cookies,
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }
}

/// Pass-through response built by the refresh step.
///
/// Holds the cookie set forwarded upstream and the `Set-Cookie` writes for
/// the client; every write lands in both.
#[derive(Debug, Clone)]
pub struct ForwardResponse {
    request_cookies: CookieSet,
    set_cookies: Vec<SessionCookie>,
    user: Option<User>,
}

impl ForwardResponse {
    #[must_use]
    pub fn new(request_cookies: CookieSet) -> Self {
        Self {
            request_cookies,
            set_cookies: Vec::new(),
            user: None,
        }
    }

    /// Applies a write to the forwarded request and the outgoing response.
    /// A later write for the same name replaces the earlier one.
    pub fn set_cookie(&mut self, cookie: SessionCookie) {
        self.request_cookies.apply(&cookie);
        self.set_cookies.retain(|c| c.name != cookie.name);
        self.set_cookies.push(cookie);
    }

    #[must_use]
    pub fn request_cookies(&self) -> &CookieSet {
        &self.request_cookies
    }

    #[must_use]
    pub fn set_cookies(&self) -> &[SessionCookie] {
        &self.set_cookies
    }

    #[must_use]
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    #[must_use]
    pub fn into_parts(self) -> (CookieSet, Vec<SessionCookie>) {
        (self.request_cookies, self.set_cookies)
    }

    /// Consumes the pass-through response in favour of a redirect. Cookie
    /// writes already made by the refresh step travel with it.
    #[must_use]
    pub fn into_redirect(self, location: String) -> RedirectResponse {
        RedirectResponse {
            location,
            set_cookies: self.set_cookies,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectResponse {
    pub location: String,
    pub set_cookies: Vec<SessionCookie>,
}

/// Exactly one of these is produced per request.
#[derive(Debug)]
pub enum GateOutcome {
    /// Excluded asset path; the gate did not run.
    Bypass,
    Forward(ForwardResponse),
    Redirect(RedirectResponse),
}

impl GateOutcome {
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::Redirect(r) => Some(&r.location),
            _ => None,
        }
    }
}

pub struct RequestGate {
    rules: RouteRules,
    identity: Arc<dyn IdentityBackend>,
}

impl RequestGate {
    #[must_use]
    pub fn new(rules: RouteRules, identity: Arc<dyn IdentityBackend>) -> Self {
        Self { rules, identity }
    }

    #[must_use]
    pub fn rules(&self) -> &RouteRules {
        &self.rules
    }

    #[must_use]
    pub fn identity(&self) -> &Arc<dyn IdentityBackend> {
        &self.identity
    }

    /// Evaluates one request.
    pub async fn evaluate(&self, request: GateRequest) -> GateOutcome {
        let path = request.path().to_string();
        if self.rules.is_excluded(&path) {
            return GateOutcome::Bypass;
        }

        let mut response = ForwardResponse::new(request.cookies);
        let refresh = self.identity.refresh_session(response.request_cookies()).await;
        let refreshed = match refresh {
            Ok(writes) => {
                for cookie in writes {
                    response.set_cookie(cookie);
                }
                true
            }
            Err(e) => {
                warn!(http_path = %path, error = %e, "Session refresh failed");
                false
            }
        };

        if !self.rules.is_protected(&path) {
            return GateOutcome::Forward(response);
        }

        if !refreshed {
            return self.deny(response, &request.method, &path);
        }

        let lookup = self.identity.get_current_user(response.request_cookies()).await;
        match lookup {
            Ok(Some(user)) => {
                debug!(http_path = %path, user_id = %user.id, "Authenticated request");
                response.user = Some(user);
                GateOutcome::Forward(response)
            }
            Ok(None) => self.deny(response, &request.method, &path),
            Err(e) => {
                warn!(http_path = %path, error = %e, "User lookup failed");
                self.deny(response, &request.method, &path)
            }
        }
    }

    fn deny(&self, response: ForwardResponse, method: &Method, path: &str) -> GateOutcome {
        let location = self.rules.login_redirect(path);
        debug!(
            http_method = %method,
            http_path = %path,
            location = %location,
            action = "REDIRECT",
            "Protected path without session"
        );
        GateOutcome::Redirect(response.into_redirect(location))
    }
}
