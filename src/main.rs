//! `StockGate` - Session-refreshing request gate for the stock inventory app.
//!
//! Copyright (C) 2026 Maverick
//! SPDX-License-Identifier: AGPL-3.0-only
//!
//! Initializes the application runtime, loads configuration, sets up logging,
//! and launches the gate proxy in front of the page renderer.

use stockgate::{Config, GateProxy, HostedIdentity, IdentityBackend, RequestGate};

use pingora::proxy::http_proxy_service;
use pingora::server::Server;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    dotenvy::dotenv().ok();

    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(non_blocking);

    if log_format.eq_ignore_ascii_case("pretty") {
        subscriber.init();
    } else {
        subscriber.json().init();
    }

    let config = Config::from_env();
    info!(
        listen_addr = %config.listen_addr,
        backend_url = %config.backend_url,
        identity_url = %config.identity_url,
        login_path = %config.routes.login_path(),
        log_format = %config.log_format,
        "Server initialized"
    );

    let identity: Arc<dyn IdentityBackend> = Arc::new(HostedIdentity::new(&config));
    let gate = Arc::new(RequestGate::new(config.routes.clone(), identity));

    let mut server = Server::new(None).expect("Failed to create Pingora server");
    server.bootstrap();

    let proxy = GateProxy::new(config.clone(), gate);

    let mut proxy_service = http_proxy_service(&server.configuration, proxy);
    proxy_service.add_tcp(&config.listen_addr.to_string());
    server.add_service(proxy_service);

    server.run_forever();
}
