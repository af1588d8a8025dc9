//! Middleware components.
//!
//! Session cookie parsing, rendering and chunking.

mod cookies;

pub use cookies::{
    CookieOptions, CookieSet, MAX_CHUNK_SIZE, SameSite, SessionCookie, chunk_cookies,
    clear_chunked,
};
