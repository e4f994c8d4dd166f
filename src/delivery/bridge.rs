use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::error::ProviderError;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Body of `GET /health`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    #[serde(default)]
    pub status: String,
    pub pairing_hint: Option<String>,
    /// Older bridges only report whether a QR code is waiting to be scanned.
    #[serde(default, rename = "hasQR")]
    pub has_qr: bool,
}

impl HealthReport {
    pub fn is_ready(&self) -> bool {
        self.status == "ready"
    }

    pub fn needs_pairing(&self) -> bool {
        self.status == "needs-pairing" || self.has_qr
    }
}

#[derive(Debug, Deserialize)]
struct SendReply {
    #[serde(default)]
    success: bool,
    error: Option<String>,
}

/// Result of one POST to the bridge that reached it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// HTTP 503: the bridge is up but not paired or still starting.
    NotReady,
    Rejected(String),
}

/// HTTP client for the local chat bridge.
pub struct BridgeClient {
    http: Client,
    base_url: String,
}

impl BridgeClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ProviderError> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn health(&self) -> Result<HealthReport, ProviderError> {
        let resp = self
            .http
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()?;
        Ok(resp.json()?)
    }

    /// Transport failures are `Err`; anything the bridge answered is an outcome.
    pub fn send(&self, number: &str, message: &str) -> Result<SendOutcome, ProviderError> {
        debug!("sending {} chars to {number}", message.chars().count());
        let resp = self
            .http
            .post(format!("{}/send", self.base_url))
            .json(&serde_json::json!({ "number": number, "message": message }))
            .send()?;
        Ok(read_outcome(resp))
    }

    /// Ask the bridge to send its own canned test message.
    pub fn test(&self) -> Result<SendOutcome, ProviderError> {
        let resp = self
            .http
            .post(format!("{}/test", self.base_url))
            .send()?;
        Ok(read_outcome(resp))
    }
}

fn read_outcome(resp: reqwest::blocking::Response) -> SendOutcome {
    let status = resp.status();
    if status == StatusCode::SERVICE_UNAVAILABLE {
        return SendOutcome::NotReady;
    }
    let body = resp.text().unwrap_or_default();
    if !status.is_success() {
        return SendOutcome::Rejected(format!("HTTP {status}: {body}"));
    }
    match serde_json::from_str::<SendReply>(&body) {
        Ok(r) if r.success => SendOutcome::Sent,
        Ok(r) => SendOutcome::Rejected(r.error.unwrap_or_else(|| "Unknown error".to_string())),
        Err(e) => SendOutcome::Rejected(format!("unreadable reply: {e}")),
    }
}
