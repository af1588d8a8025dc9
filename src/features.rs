//! Optional application features.
//!
//! Actions served by the gate itself rather than the page renderer.

pub mod reports;
