//! Test utilities and shared configuration.
//!
//! This module provides common helpers for unit tests: a baseline config,
//! a scripted identity backend and a minimal HTTP stub server.

use crate::config::{Config, GateError, Result};
use crate::core::gate::RouteRules;
use crate::core::middleware::{CookieOptions, CookieSet, SessionCookie};
use crate::identity::{IdentityBackend, User};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Creates a standard configuration for testing purposes.
///
/// Default routes, the `sb-auth-token` cookie and unreachable upstreams.
#[must_use]
pub fn create_test_config() -> Arc<Config> {
    Arc::new(Config {
        listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080),
        backend_url: "http://127.0.0.1:3000".to_string(),
        identity_url: "http://127.0.0.1:54321".to_string(),
        identity_api_key: "anon-key".to_string(),
        identity_timeout_ms: 2000,
        auth_cookie_name: "sb-auth-token".to_string(),
        refresh_margin_secs: 60,
        cookie_max_age_secs: 3600,
        cookie_secure: false,
        routes: RouteRules::default(),
        report_status_path: "/reports/status".to_string(),
        reports_table: "reports".to_string(),
        log_format: "pretty".to_string(),
    })
}

/// Identity backend driven entirely by the value of one cookie.
///
/// `valid` authenticates; a configured stale value is rotated to `valid`
/// by `refresh_session`; anything else is anonymous.
pub struct MockIdentity {
    cookie_name: String,
    valid: String,
    stale: Option<String>,
    fail_refresh: bool,
    fail_lookup: bool,
    refresh_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
}

impl MockIdentity {
    #[must_use]
    pub fn new(cookie_name: &str, valid: &str) -> Self {
        Self {
            cookie_name: cookie_name.to_string(),
            valid: valid.to_string(),
            stale: None,
            fail_refresh: false,
            fail_lookup: false,
            refresh_calls: AtomicUsize::new(0),
            lookup_calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn rotating(mut self, stale: &str) -> Self {
        self.stale = Some(stale.to_string());
        self
    }

    #[must_use]
    pub fn failing_refresh(mut self) -> Self {
        self.fail_refresh = true;
        self
    }

    #[must_use]
    pub fn failing_lookup(mut self) -> Self {
        self.fail_lookup = true;
        self
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityBackend for MockIdentity {
    async fn refresh_session(&self, cookies: &CookieSet) -> Result<Vec<SessionCookie>> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh {
            return Err(GateError::Identity("refresh unavailable".to_string()));
        }
        let current = cookies.get(&self.cookie_name);
        if current.is_some() && current == self.stale.as_deref() {
            return Ok(vec![SessionCookie::new(
                self.cookie_name.as_str(),
                self.valid.as_str(),
                CookieOptions::default(),
            )]);
        }
        Ok(Vec::new())
    }

    async fn get_current_user(&self, cookies: &CookieSet) -> Result<Option<User>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookup {
            return Err(GateError::Identity("lookup unavailable".to_string()));
        }
        Ok((cookies.get(&self.cookie_name) == Some(self.valid.as_str())).then(|| User {
            id: "user-1".to_string(),
            email: Some("volunteer@example.org".to_string()),
        }))
    }

    fn access_token(&self, cookies: &CookieSet) -> Option<String> {
        cookies
            .get(&self.cookie_name)
            .filter(|v| *v == self.valid)
            .map(str::to_string)
    }
}

/// Request as seen by [`spawn_http_stub`]. Header names are lowercased.
#[derive(Debug, Clone)]
pub struct StubRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StubRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub body: String,
}

impl StubResponse {
    #[must_use]
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }
}

pub type StubHandler = Arc<dyn Fn(&StubRequest) -> StubResponse + Send + Sync>;

/// Spawns a one-request-per-connection HTTP/1.1 server on an ephemeral port.
/// Returns the port and a counter of requests served.
pub async fn spawn_http_stub(handler: StubHandler) -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        loop {
            if let Ok((mut socket, _)) = listener.accept().await {
                let handler = handler.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    let Some(request) = read_request(&mut socket).await else {
                        return;
                    };
                    counter.fetch_add(1, Ordering::SeqCst);
                    let response = handler(&request);
                    let raw = format!(
                        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        response.status,
                        response.body.len(),
                        response.body
                    );
                    let _ = socket.write_all(raw.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        }
    });

    (port, hits)
}

async fn read_request(socket: &mut TcpStream) -> Option<StubRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(n, _)| n == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Some(StubRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&buf[header_end..]).into_owned(),
    })
}
