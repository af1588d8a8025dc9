//! Proxy service logic.
//!
//! Runs the request gate inside pingora's request filter, serves the report
//! status action locally and forwards everything else to the page renderer
//! with the refreshed cookies.

use crate::config::Config;
use crate::core::gate::{ForwardResponse, GateOutcome, GateRequest, RequestGate};
use crate::core::middleware::{CookieSet, SessionCookie};
use crate::core::proxy::response::{parse_form, serve_redirect, serve_text};
use crate::features::reports::{ReportClient, ReportStatus};
use async_trait::async_trait;
use pingora::http::{RequestHeader, ResponseHeader};
use pingora::proxy::{FailToProxy, ProxyHttp, Session};
use pingora::{ErrorSource, ErrorType, Result};
use pingora::upstreams::peer::HttpPeer;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Largest form body accepted by the report action.
const MAX_FORM_BODY: usize = 16 * 1024;

/// Page the report action returns to after a successful update.
const REPORTS_PAGE: &str = "/reports";

/// Context for a single request.
#[derive(Debug, Default)]
pub struct RequestCtx {
    /// Cookie header to send upstream when the refresh step rewrote cookies.
    pub forward_cookies: Option<String>,
    pub cookies_rewritten: bool,
    /// Rendered `Set-Cookie` values for the client.
    pub set_cookies: Vec<String>,
    pub user_id: Option<String>,
    pub bypassed: bool,
}

impl RequestCtx {
    /// Takes ownership of the pass-through response and keeps what the
    /// upstream and response filters need.
    pub fn record_forward(&mut self, forward: ForwardResponse) {
        self.user_id = forward.user().map(|u| u.id.clone());
        let (request_cookies, set_cookies) = forward.into_parts();
        self.cookies_rewritten = !set_cookies.is_empty();
        if self.cookies_rewritten {
            self.forward_cookies = request_cookies.to_header_value();
        }
        self.set_cookies = render_set_cookies(&set_cookies);
    }
}

fn render_set_cookies(cookies: &[SessionCookie]) -> Vec<String> {
    cookies.iter().map(SessionCookie::to_header_value).collect()
}

/// Splits a backend URL into `host:port`, TLS flag and SNI.
#[must_use]
pub fn backend_addr(url: &str) -> (String, bool, String) {
    let (rest, tls) = if let Some(rest) = url.strip_prefix("https://") {
        (rest, true)
    } else {
        (url.strip_prefix("http://").unwrap_or(url), false)
    };
    let authority = rest.split('/').next().unwrap_or(rest);

    let has_port = authority
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
        && !authority.ends_with(']');

    let addr = if has_port {
        authority.to_string()
    } else if tls {
        format!("{authority}:443")
    } else {
        format!("{authority}:80")
    };

    let sni = if tls {
        authority
            .rsplit_once(':')
            .filter(|_| has_port)
            .map_or(authority, |(host, _)| host)
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string()
    } else {
        String::new()
    };

    (addr, tls, sni)
}

/// Replaces the upstream `Cookie` header when the refresh step rewrote cookies.
///
/// # Errors
///
/// Returns an error if the header value is invalid.
pub fn apply_forward_cookies(req: &mut RequestHeader, ctx: &RequestCtx) -> Result<()> {
    if !ctx.cookies_rewritten {
        return Ok(());
    }
    match &ctx.forward_cookies {
        Some(value) => req.insert_header("Cookie", value.as_str())?,
        None => {
            req.remove_header("Cookie");
        }
    }
    Ok(())
}

/// Appends the refresh step's `Set-Cookie` values to the upstream response.
///
/// # Errors
///
/// Returns an error if a header value is invalid.
pub fn append_set_cookies(resp: &mut ResponseHeader, ctx: &RequestCtx) -> Result<()> {
    for cookie in &ctx.set_cookies {
        resp.append_header("Set-Cookie", cookie.as_str())?;
    }
    Ok(())
}

/// Status sent for a request that failed before or while proxying. Zero
/// means the client connection is already gone.
#[must_use]
pub fn error_status(e: &pingora::Error) -> u16 {
    match e.etype() {
        ErrorType::HTTPStatus(code) => *code,
        _ => match e.esource() {
            ErrorSource::Upstream => 502,
            ErrorSource::Downstream => match e.etype() {
                ErrorType::WriteError | ErrorType::ReadError | ErrorType::ConnectionClosed => 0,
                _ => 400,
            },
            ErrorSource::Internal | ErrorSource::Unset => 500,
        },
    }
}

/// Empty error response that still carries the refresh step's cookie writes.
///
/// # Errors
///
/// Returns an error if the status or a header value is invalid.
pub fn error_response(code: u16, ctx: &RequestCtx) -> Result<ResponseHeader> {
    let mut resp = ResponseHeader::build(code, None)?;
    resp.insert_header("Content-Length", "0")?;
    resp.insert_header("Cache-Control", "private, no-store")?;
    append_set_cookies(&mut resp, ctx)?;
    Ok(resp)
}

/// Main proxy service implementing `ProxyHttp`.
pub struct GateProxy {
    config: Arc<Config>,
    gate: Arc<RequestGate>,
    reports: ReportClient,
}

impl GateProxy {
    /// Creates a new `GateProxy` service.
    #[must_use]
    pub fn new(config: Arc<Config>, gate: Arc<RequestGate>) -> Self {
        let reports = ReportClient::new(&config);
        Self {
            config,
            gate,
            reports,
        }
    }

    fn gate_request(session: &Session) -> GateRequest {
        let req = session.req_header();
        let cookies = CookieSet::from_headers(
            req.headers
                .get_all("Cookie")
                .iter()
                .filter_map(|v| v.to_str().ok()),
        );
        GateRequest::new(req.method.clone(), req.uri.clone(), cookies)
    }

    fn is_report_action(&self, session: &Session) -> bool {
        let req = session.req_header();
        req.method == http::Method::POST && req.uri.path() == self.config.report_status_path
    }

    /// Reads the whole body. Returns `None` once it exceeds [`MAX_FORM_BODY`];
    /// the remainder is still drained so the client sees the response.
    async fn read_form_body(session: &mut Session) -> Result<Option<Vec<u8>>> {
        let mut body = Vec::new();
        let mut too_large = false;
        while let Some(chunk) = session.read_request_body().await? {
            if too_large || body.len() + chunk.len() > MAX_FORM_BODY {
                too_large = true;
                body.clear();
                continue;
            }
            body.extend_from_slice(&chunk);
        }
        Ok((!too_large).then_some(body))
    }

    async fn handle_report_action(
        &self,
        session: &mut Session,
        forward: ForwardResponse,
    ) -> Result<bool> {
        let path = session.req_header().uri.path().to_string();
        let access_token = self.gate.identity().access_token(forward.request_cookies());
        let set_cookies = render_set_cookies(forward.set_cookies());

        let Some(access_token) = access_token else {
            let location = self.gate.rules().login_redirect(&path);
            debug!(http_path = %path, action = "REDIRECT", "Report action without session");
            return serve_redirect(session, 307, &location, &set_cookies).await;
        };

        let Some(body) = Self::read_form_body(session).await? else {
            return serve_text(session, 413, "Request body too large", &set_cookies).await;
        };

        let form = parse_form(&body);
        let id = form.get("id").map(|s| s.trim()).unwrap_or_default();
        let status = form
            .get("status")
            .and_then(|s| s.parse::<ReportStatus>().ok());

        let Some(status) = status.filter(|_| !id.is_empty()) else {
            debug!(http_path = %path, "Rejected report status form");
            return serve_text(session, 400, "Invalid report status update", &set_cookies).await;
        };

        match self.reports.update_status(id, status, &access_token).await {
            Ok(()) => {
                info!(
                    report_id = %id,
                    status = %status,
                    user_id = ?forward.user().map(|u| &u.id),
                    "Report status changed"
                );
                serve_redirect(session, 303, REPORTS_PAGE, &set_cookies).await
            }
            Err(e) => {
                warn!(report_id = %id, error = %e, "Report status update failed");
                serve_text(session, 502, "Report status update failed", &set_cookies).await
            }
        }
    }
}

#[async_trait]
impl ProxyHttp for GateProxy {
    type CTX = RequestCtx;

    fn new_ctx(&self) -> Self::CTX {
        RequestCtx::default()
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        let request = Self::gate_request(session);

        match self.gate.evaluate(request).await {
            GateOutcome::Bypass => {
                ctx.bypassed = true;
                Ok(false)
            }
            GateOutcome::Redirect(redirect) => {
                let set_cookies = render_set_cookies(&redirect.set_cookies);
                serve_redirect(session, 307, &redirect.location, &set_cookies).await
            }
            GateOutcome::Forward(forward) => {
                if self.is_report_action(session) {
                    return self.handle_report_action(session, forward).await;
                }
                ctx.record_forward(forward);
                Ok(false)
            }
        }
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        let (addr, tls, sni) = backend_addr(&self.config.backend_url);
        let peer = Box::new(HttpPeer::new(addr.as_str(), tls, sni));
        Ok(peer)
    }

    async fn upstream_request_filter(
        &self,
        _session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        apply_forward_cookies(upstream_request, ctx)
    }

    async fn response_filter(
        &self,
        _session: &mut Session,
        upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        append_set_cookies(upstream_response, ctx)
    }

    async fn fail_to_proxy(
        &self,
        session: &mut Session,
        e: &pingora::Error,
        ctx: &mut Self::CTX,
    ) -> FailToProxy
    where
        Self::CTX: Send + Sync,
    {
        let code = error_status(e);
        if code > 0 {
            // Upstream headers already went out through response_filter.
            let written = if session.response_written().is_some() {
                session.respond_error(code).await
            } else {
                match error_response(code, ctx) {
                    Ok(resp) => session.write_error_response(resp, bytes::Bytes::new()).await,
                    Err(err) => Err(err),
                }
            };
            if let Err(err) = written {
                warn!(status = code, error = %err, "Failed to send error response");
            }
        }

        FailToProxy {
            error_code: code,
            can_reuse_downstream: false,
        }
    }

    async fn logging(
        &self,
        session: &mut Session,
        e: Option<&pingora::Error>,
        ctx: &mut Self::CTX,
    ) {
        let status = session.response_written().map_or(0, |r| r.status.as_u16());
        let path = session.req_header().uri.path();

        debug!(
            http_path = %path,
            status = status,
            user_id = ctx.user_id.as_deref().unwrap_or("anonymous"),
            bypassed = ctx.bypassed,
            "Request completed"
        );

        if let Some(err) = e {
            warn!(http_path = %path, status = status, error = %err, "Request error");
        } else if status >= 500 {
            warn!(http_path = %path, status = status, "Upstream error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gate::RouteRules;
    use crate::core::middleware::CookieOptions;
    use crate::test_utils::{MockIdentity, create_test_config};

    fn forward_with(cookie_header: &str, writes: Vec<SessionCookie>) -> ForwardResponse {
        let mut forward = ForwardResponse::new(CookieSet::parse(cookie_header));
        for write in writes {
            forward.set_cookie(write);
        }
        forward
    }

    #[test]
    fn test_gate_proxy_creation() {
        let config = create_test_config();
        let identity = Arc::new(MockIdentity::new("sb-auth-token", "good"));
        let gate = Arc::new(RequestGate::new(RouteRules::default(), identity));
        let proxy = GateProxy::new(config, gate);

        let ctx = proxy.new_ctx();
        assert!(ctx.set_cookies.is_empty());
        assert!(!ctx.cookies_rewritten);
        assert!(!ctx.bypassed);
    }

    #[test]
    fn test_backend_addr_parsing() {
        assert_eq!(
            backend_addr("http://127.0.0.1:3000"),
            ("127.0.0.1:3000".to_string(), false, String::new())
        );
        assert_eq!(
            backend_addr("http://renderer"),
            ("renderer:80".to_string(), false, String::new())
        );
        assert_eq!(
            backend_addr("https://app.example.org/base"),
            ("app.example.org:443".to_string(), true, "app.example.org".to_string())
        );
        assert_eq!(
            backend_addr("https://app.example.org:8443"),
            ("app.example.org:8443".to_string(), true, "app.example.org".to_string())
        );
        assert_eq!(
            backend_addr("127.0.0.1:3000"),
            ("127.0.0.1:3000".to_string(), false, String::new())
        );
    }

    #[test]
    fn test_record_forward_without_writes_keeps_cookie_header() {
        let mut ctx = RequestCtx::default();
        ctx.record_forward(forward_with("a=1; b=2", Vec::new()));

        assert!(!ctx.cookies_rewritten);
        assert!(ctx.forward_cookies.is_none());

        let mut req = RequestHeader::build("GET", b"/", None).unwrap();
        req.insert_header("Cookie", "a=1; b=2").unwrap();
        apply_forward_cookies(&mut req, &ctx).unwrap();
        assert_eq!(req.headers.get("Cookie").unwrap(), "a=1; b=2");
    }

    #[test]
    fn test_refreshed_cookie_reaches_upstream_and_client() {
        let write = SessionCookie::new("sb-auth-token", "fresh", CookieOptions::default());
        let mut ctx = RequestCtx::default();
        ctx.record_forward(forward_with("sb-auth-token=stale; theme=dark", vec![write]));

        let mut req = RequestHeader::build("GET", b"/", None).unwrap();
        req.insert_header("Cookie", "sb-auth-token=stale; theme=dark").unwrap();
        apply_forward_cookies(&mut req, &ctx).unwrap();
        assert_eq!(
            req.headers.get("Cookie").unwrap(),
            "sb-auth-token=fresh; theme=dark"
        );

        let mut resp = ResponseHeader::build(200, None).unwrap();
        resp.append_header("Set-Cookie", "theme=light").unwrap();
        append_set_cookies(&mut resp, &ctx).unwrap();
        let values: Vec<_> = resp
            .headers
            .get_all("Set-Cookie")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], "theme=light");
        assert!(values[1].starts_with("sb-auth-token=fresh"));
    }

    #[test]
    fn test_cleared_session_removes_upstream_cookie() {
        let removal = SessionCookie::removal("sb-auth-token", &CookieOptions::default());
        let mut ctx = RequestCtx::default();
        ctx.record_forward(forward_with("sb-auth-token=revoked", vec![removal]));

        assert!(ctx.cookies_rewritten);
        assert!(ctx.forward_cookies.is_none());

        let mut req = RequestHeader::build("GET", b"/", None).unwrap();
        req.insert_header("Cookie", "sb-auth-token=revoked").unwrap();
        apply_forward_cookies(&mut req, &ctx).unwrap();
        assert!(req.headers.get("Cookie").is_none());
        assert_eq!(ctx.set_cookies.len(), 1);
        assert!(ctx.set_cookies[0].contains("Max-Age=0"));
    }

    #[test]
    fn test_error_status_mapping() {
        let refused = pingora::Error::new_up(ErrorType::ConnectRefused);
        assert_eq!(error_status(&refused), 502);

        let gone = pingora::Error::new_down(ErrorType::ConnectionClosed);
        assert_eq!(error_status(&gone), 0);

        let bad_header = pingora::Error::new_down(ErrorType::InvalidHTTPHeader);
        assert_eq!(error_status(&bad_header), 400);

        let explicit = pingora::Error::new(ErrorType::HTTPStatus(413));
        assert_eq!(error_status(&explicit), 413);

        let internal = pingora::Error::new(ErrorType::InternalError);
        assert_eq!(error_status(&internal), 500);
    }

    #[test]
    fn test_error_response_keeps_refreshed_cookie() {
        let write = SessionCookie::new("sb-auth-token", "fresh", CookieOptions::default());
        let mut ctx = RequestCtx::default();
        ctx.record_forward(forward_with("sb-auth-token=stale", vec![write]));

        let resp = error_response(502, &ctx).unwrap();
        assert_eq!(resp.status.as_u16(), 502);
        assert_eq!(resp.headers.get("Content-Length").unwrap(), "0");
        let cookie = resp.headers.get("Set-Cookie").unwrap().to_str().unwrap();
        assert!(cookie.starts_with("sb-auth-token=fresh"));

        let empty = error_response(500, &RequestCtx::default()).unwrap();
        assert!(empty.headers.get("Set-Cookie").is_none());
    }
}
