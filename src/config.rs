//! Configuration management.
//!
//! Loads configuration from environment variables using dotenvy.
//! All settings are loaded at startup and shared through an `Arc`.

mod error;
mod settings;

pub use error::{GateError, Result};
pub use settings::Config;
