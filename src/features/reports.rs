//! Report status updates.
//!
//! Passes a status change for one report row straight through to the
//! hosted data API, authenticated as the calling user.

use crate::config::{Config, GateError, Result};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Client;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReportStatus {
    Pending,
    Verified,
    Flagged,
}

impl ReportStatus {
    pub const ALL: [Self; 3] = [Self::Pending, Self::Verified, Self::Flagged];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Verified => "Verified",
            Self::Flagged => "Flagged",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| GateError::Report(format!("unknown report status: {s}")))
    }
}

pub struct ReportClient {
    client: Client,
    base_url: String,
    api_key: String,
    table: String,
}

impl ReportClient {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_millis(config.identity_timeout_ms))
                .build()
                .unwrap_or_default(),
            base_url: config.identity_url.trim_end_matches('/').to_string(),
            api_key: config.identity_api_key.clone(),
            table: config.reports_table.clone(),
        }
    }

    fn row_url(&self, id: &str) -> String {
        format!(
            "{}/rest/v1/{}?id=eq.{}",
            self.base_url,
            self.table,
            utf8_percent_encode(id, NON_ALPHANUMERIC)
        )
    }

    /// Sets the status of report `id`.
    ///
    /// # Errors
    ///
    /// Returns `GateError::Report` for an empty id, a transport failure or a
    /// non-success response from the data API.
    pub async fn update_status(
        &self,
        id: &str,
        status: ReportStatus,
        access_token: &str,
    ) -> Result<()> {
        let id = id.trim();
        if id.is_empty() {
            return Err(GateError::Report("report id is empty".to_string()));
        }

        let resp = self
            .client
            .patch(self.row_url(id))
            .header("apikey", &self.api_key)
            .header("Prefer", "return=minimal")
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await
            .map_err(|e| GateError::Report(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(GateError::Report(format!(
                "status update returned {}",
                resp.status()
            )));
        }

        debug!(report_id = %id, status = %status, "Report status updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{StubRequest, StubResponse, create_test_config, spawn_http_stub};
    use std::sync::{Arc, Mutex};

    fn client_for(port: u16) -> ReportClient {
        let mut config = (*create_test_config()).clone();
        config.identity_url = format!("http://127.0.0.1:{port}");
        ReportClient::new(&config)
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("Pending".parse::<ReportStatus>().unwrap(), ReportStatus::Pending);
        assert_eq!("Verified".parse::<ReportStatus>().unwrap(), ReportStatus::Verified);
        assert_eq!("Flagged".parse::<ReportStatus>().unwrap(), ReportStatus::Flagged);

        assert!("verified".parse::<ReportStatus>().is_err());
        assert!("Deleted".parse::<ReportStatus>().is_err());
        assert!("".parse::<ReportStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_as_name() {
        let json = serde_json::json!({ "status": ReportStatus::Flagged });
        assert_eq!(json.to_string(), r#"{"status":"Flagged"}"#);
        assert_eq!(ReportStatus::Verified.to_string(), "Verified");
    }

    #[test]
    fn test_row_url_encodes_id() {
        let client = client_for(1);
        assert_eq!(
            client.row_url("42"),
            "http://127.0.0.1:1/rest/v1/reports?id=eq.42"
        );
        assert_eq!(
            client.row_url("1&status=eq.x"),
            "http://127.0.0.1:1/rest/v1/reports?id=eq.1%26status%3Deq%2Ex"
        );
    }

    #[tokio::test]
    async fn test_update_status_sends_patch() {
        let seen: Arc<Mutex<Option<StubRequest>>> = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let (port, _) = spawn_http_stub(Arc::new(move |req: &StubRequest| {
            *sink.lock().unwrap() = Some(req.clone());
            StubResponse::json(204, "")
        }))
        .await;

        client_for(port)
            .update_status("42", ReportStatus::Verified, "token-1")
            .await
            .unwrap();

        let req = seen.lock().unwrap().clone().unwrap();
        assert_eq!(req.method, "PATCH");
        assert_eq!(req.path, "/rest/v1/reports?id=eq.42");
        assert_eq!(req.header("authorization"), Some("Bearer token-1"));
        assert_eq!(req.header("apikey"), Some("anon-key"));
        assert_eq!(req.body, r#"{"status":"Verified"}"#);
    }

    #[tokio::test]
    async fn test_update_status_failures() {
        let (port, hits) =
            spawn_http_stub(Arc::new(|_: &StubRequest| StubResponse::json(403, "{}"))).await;
        let client = client_for(port);

        let err = client
            .update_status("7", ReportStatus::Flagged, "token")
            .await;
        assert!(matches!(err, Err(GateError::Report(_))));

        let err = client
            .update_status("  ", ReportStatus::Flagged, "token")
            .await;
        assert!(err.is_err());
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
