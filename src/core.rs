//! Core system components.
//!
//! Contains the request gate, cookie handling and the proxy that hosts them.

pub mod gate;
pub mod middleware;
pub mod proxy;
