//! Proxy service implementation.
//!
//! Hosts the request gate in front of the page renderer: request filtering,
//! upstream peer selection and cookie propagation on the response.

pub mod response;
pub mod service;

pub use service::{GateProxy, RequestCtx};
