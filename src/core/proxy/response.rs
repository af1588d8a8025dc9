//! HTTP response utilities.
//!
//! Provides shared functions for responses the gate writes itself, and
//! form parsing for actions it serves.

use pingora::Result;
use pingora::http::ResponseHeader;
use pingora::proxy::Session;
use std::collections::HashMap;

const NO_STORE: &str = "no-store, no-cache, must-revalidate, max-age=0";

/// Serves a redirect carrying every `Set-Cookie` value given.
///
/// # Errors
///
/// Returns an error if headers cannot be built or response cannot be written.
pub async fn serve_redirect(
    session: &mut Session,
    status: u16,
    location: &str,
    set_cookies: &[String],
) -> Result<bool> {
    let mut header = ResponseHeader::build(status, None)?;
    header.insert_header("Location", location)?;
    header.insert_header("Cache-Control", NO_STORE)?;
    header.insert_header("Content-Length", "0")?;

    for cookie in set_cookies {
        header.append_header("Set-Cookie", cookie.as_str())?;
    }

    session
        .write_response_header(Box::new(header), true)
        .await?;
    Ok(true)
}

/// Serves a short plain-text response.
///
/// # Errors
///
/// Returns an error if headers cannot be built or response cannot be written.
pub async fn serve_text(
    session: &mut Session,
    status: u16,
    text: &'static str,
    set_cookies: &[String],
) -> Result<bool> {
    let mut header = ResponseHeader::build(status, None)?;
    header.insert_header("Content-Type", "text/plain; charset=utf-8")?;
    header.insert_header("Content-Length", text.len().to_string())?;
    header.insert_header("Cache-Control", NO_STORE)?;

    for cookie in set_cookies {
        header.append_header("Set-Cookie", cookie.as_str())?;
    }

    session
        .write_response_header(Box::new(header), false)
        .await?;
    session
        .write_response_body(Some(bytes::Bytes::from_static(text.as_bytes())), true)
        .await?;
    Ok(true)
}

/// Parses an `application/x-www-form-urlencoded` body. Later duplicates win.
#[must_use]
pub fn parse_form(body: &[u8]) -> HashMap<String, String> {
    use percent_encoding::percent_decode_str;

    let body_str = String::from_utf8_lossy(body);
    let mut fields = HashMap::new();

    for pair in body_str.split('&') {
        let Some((k, v)) = pair.split_once('=') else {
            continue;
        };
        let dk = percent_decode_str(&k.replace('+', " "))
            .decode_utf8_lossy()
            .into_owned();
        let dv = percent_decode_str(&v.replace('+', " "))
            .decode_utf8_lossy()
            .into_owned();
        if !dk.is_empty() {
            fields.insert(dk, dv);
        }
    }

    fields
}
