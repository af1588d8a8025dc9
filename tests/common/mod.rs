use pingora::proxy::http_proxy_service;
use pingora::server::Server;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use stockgate::config::Config;
use stockgate::core::gate::{RequestGate, RouteRules};
use stockgate::core::proxy::GateProxy;
use stockgate::identity::{HostedIdentity, IdentityBackend, StoredSession, encode_session};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const COOKIE_NAME: &str = "sb-auth-token";

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Cookie header carrying a session for `access`, expiring in `ttl` seconds.
pub fn session_cookie(access: &str, ttl: u64) -> String {
    let session = StoredSession {
        access_token: access.to_string(),
        refresh_token: format!("{access}-refresh"),
        expires_at: Some(unix_now() + ttl),
        expires_in: None,
        token_type: Some("bearer".to_string()),
    };
    format!("{COOKIE_NAME}={}", encode_session(&session).unwrap())
}

pub struct RawRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RawRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<RawRequest> {
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
    let request_line = lines.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Some(RawRequest {
        request_line,
        headers,
        body: String::from_utf8_lossy(&buf[header_end..]).into_owned(),
    })
}

async fn respond(socket: &mut TcpStream, status: u16, content_type: &str, body: &str) {
    let raw = format!(
        "HTTP/1.1 {status} Mock\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = socket.write_all(raw.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Page renderer stand-in. Echoes the `Cookie` header it received.
pub async fn spawn_mock_backend() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            if let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Some(req) = read_request(&mut socket).await else {
                        return;
                    };
                    let body = format!("cookie:{}", req.header("cookie").unwrap_or(""));
                    respond(&mut socket, 200, "text/plain", &body).await;
                });
            }
        }
    });

    port
}

/// Hosted identity and data API stand-in.
///
/// Access tokens `good` and `fresh` are valid. The refresh token
/// `expiring-refresh` is exchanged for `fresh`; every other refresh token is
/// rejected. Returns the port and a request counter.
pub async fn spawn_mock_identity() -> (u16, Arc<AtomicUsize>) {
    spawn_mock_identity_with(204).await
}

/// Same as [`spawn_mock_identity`], answering authorized report updates
/// with `patch_status`.
pub async fn spawn_mock_identity_with(patch_status: u16) -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        loop {
            if let Ok((mut socket, _)) = listener.accept().await {
                let counter = counter.clone();
                tokio::spawn(async move {
                    let Some(req) = read_request(&mut socket).await else {
                        return;
                    };
                    counter.fetch_add(1, Ordering::SeqCst);
                    let authorized = matches!(
                        req.header("authorization"),
                        Some("Bearer good" | "Bearer fresh")
                    );

                    let (status, body) = if req.request_line.starts_with("GET /auth/v1/user") {
                        if authorized {
                            (200, r#"{"id":"user-1","email":"volunteer@example.org"}"#)
                        } else {
                            (401, r#"{"msg":"invalid JWT"}"#)
                        }
                    } else if req.request_line.starts_with("POST /auth/v1/token") {
                        if req.body.contains("expiring-refresh") {
                            (
                                200,
                                r#"{"access_token":"fresh","refresh_token":"fresh-refresh","expires_in":3600,"token_type":"bearer"}"#,
                            )
                        } else {
                            (400, r#"{"error":"invalid_grant"}"#)
                        }
                    } else if req.request_line.starts_with("PATCH /rest/v1/reports") {
                        if authorized {
                            (patch_status, "")
                        } else {
                            (401, "{}")
                        }
                    } else {
                        (404, "{}")
                    };

                    respond(&mut socket, status, "application/json", body).await;
                });
            }
        }
    });

    (port, hits)
}

/// Port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

pub fn create_test_config(backend_port: u16, identity_port: u16) -> Arc<Config> {
    Arc::new(Config {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        backend_url: format!("http://127.0.0.1:{backend_port}"),
        identity_url: format!("http://127.0.0.1:{identity_port}"),
        identity_api_key: "anon-key".to_string(),
        identity_timeout_ms: 2000,
        auth_cookie_name: COOKIE_NAME.to_string(),
        refresh_margin_secs: 60,
        cookie_max_age_secs: 3600,
        cookie_secure: false,
        routes: RouteRules::default(),
        report_status_path: "/reports/status".to_string(),
        reports_table: "reports".to_string(),
        log_format: "pretty".to_string(),
    })
}

pub async fn spawn_proxy(config: Arc<Config>) -> (u16, std::thread::JoinHandle<()>) {
    let port = closed_port().await;

    let mut conf_clone = (*config).clone();
    conf_clone.listen_addr = format!("127.0.0.1:{port}").parse().unwrap();
    let config = Arc::new(conf_clone);

    let handle = std::thread::spawn(move || {
        let identity: Arc<dyn IdentityBackend> = Arc::new(HostedIdentity::new(&config));
        let gate = Arc::new(RequestGate::new(config.routes.clone(), identity));
        let proxy = GateProxy::new(config.clone(), gate);

        let server_conf = Arc::new(pingora::server::configuration::ServerConf::default());
        let mut service = http_proxy_service(&server_conf, proxy);
        service.add_tcp(&config.listen_addr.to_string());

        let mut server = Server::new(None).unwrap();
        server.bootstrap();
        server.add_service(service);
        server.run_forever();
    });

    tokio::time::sleep(Duration::from_secs(3)).await;
    (port, handle)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}
