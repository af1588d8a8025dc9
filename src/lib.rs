//! Library definitions.
//!
//! Exports core modules, types, and the gate proxy service implementation.

pub mod config;
pub mod core;
pub mod features;
pub mod identity;

#[cfg(any(test, feature = "testing"))]
pub mod test_utils;
pub use config::{Config, GateError, Result};
pub use core::gate::{
    ForwardResponse, GateOutcome, GateRequest, RedirectResponse, RequestGate, RouteRules,
};
pub use core::middleware::{CookieOptions, CookieSet, SameSite, SessionCookie};
pub use core::proxy::GateProxy;
pub use features::reports::{ReportClient, ReportStatus};
pub use identity::{HostedIdentity, IdentityBackend, User};
