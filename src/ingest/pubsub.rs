use base64::{Engine as _, engine::general_purpose};
use log::{debug, warn};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AccessTokenSource;
use crate::error::ProviderError;

/// One push notification as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEnvelope {
    pub message_id: String,
    pub data: Vec<u8>,
}

/// Blocking source of push notifications. `pull` returns an empty batch
/// when nothing arrived within the transport's wait window.
pub trait NotificationSource: Send {
    fn pull(&mut self) -> Result<Vec<PushEnvelope>, ProviderError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: PubSubMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PubSubMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    message_id: String,
}

/// Cloud Pub/Sub pull subscriber. Messages are acknowledged as soon as they
/// are received; recovery of anything lost afterwards relies on the next
/// notification's wider history range.
pub struct PubSubPuller {
    http: Client,
    base_url: String,
    subscription: String,
    max_messages: u32,
    tokens: Arc<dyn AccessTokenSource>,
}

impl PubSubPuller {
    pub fn new(
        api_base: &str,
        subscription_path: &str,
        max_messages: u32,
        wait: Duration,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Result<Self, ProviderError> {
        // the server may hold a pull open for the whole wait window
        let http = Client::builder()
            .timeout(wait + Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: api_base.trim_end_matches('/').to_string(),
            subscription: subscription_path.to_string(),
            max_messages,
            tokens,
        })
    }

    fn acknowledge(&self, ack_ids: Vec<String>) -> Result<(), ProviderError> {
        let resp = self
            .http
            .post(format!("{}/v1/{}:acknowledge", self.base_url, self.subscription))
            .bearer_auth(self.tokens.access_token()?)
            .json(&serde_json::json!({ "ackIds": ack_ids }))
            .send()?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            return Err(ProviderError::from_status(status, "Pub/Sub acknowledge", &body));
        }
        Ok(())
    }
}

impl NotificationSource for PubSubPuller {
    fn pull(&mut self) -> Result<Vec<PushEnvelope>, ProviderError> {
        let resp = self
            .http
            .post(format!("{}/v1/{}:pull", self.base_url, self.subscription))
            .bearer_auth(self.tokens.access_token()?)
            .json(&serde_json::json!({ "maxMessages": self.max_messages }))
            .send()?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            return Err(ProviderError::from_status(status, "Pub/Sub pull", &body));
        }

        let pulled: PullResponse = resp.json()?;
        if pulled.received_messages.is_empty() {
            return Ok(Vec::new());
        }

        let mut ack_ids = Vec::with_capacity(pulled.received_messages.len());
        let mut out = Vec::with_capacity(pulled.received_messages.len());
        for rm in pulled.received_messages {
            ack_ids.push(rm.ack_id);
            let data = general_purpose::STANDARD
                .decode(rm.message.data.trim())
                .unwrap_or_else(|e| {
                    warn!("undecodable data in message {}: {e}", rm.message.message_id);
                    Vec::new()
                });
            debug!("received push notification {}", rm.message.message_id);
            out.push(PushEnvelope {
                message_id: rm.message.message_id,
                data,
            });
        }

        self.acknowledge(ack_ids)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use httpmock::Method::POST;
    use httpmock::MockServer;

    fn puller(server: &MockServer) -> PubSubPuller {
        PubSubPuller::new(
            &server.base_url(),
            "projects/p/subscriptions/s",
            10,
            Duration::from_secs(1),
            Arc::new(StaticToken("tok".into())),
        )
        .unwrap()
    }

    #[test]
    fn pull_decodes_and_acknowledges() {
        let server = MockServer::start();
        let data = general_purpose::STANDARD.encode(r#"{"emailAddress":"a@x.com","historyId":"9"}"#);
        let pull = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/projects/p/subscriptions/s:pull")
                .json_body_includes(serde_json::json!({"maxMessages": 10}).to_string());
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({
                    "receivedMessages": [
                        {"ackId": "ack-1", "message": {"data": data, "messageId": "1"}},
                        {"ackId": "ack-2", "message": {"data": "%%%", "messageId": "2"}}
                    ]
                }));
        });
        let ack = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/projects/p/subscriptions/s:acknowledge")
                .json_body(serde_json::json!({"ackIds": ["ack-1", "ack-2"]}));
            then.status(200).body("{}");
        });

        let got = puller(&server).pull().unwrap();
        pull.assert();
        ack.assert();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].data, br#"{"emailAddress":"a@x.com","historyId":"9"}"#.to_vec());
        assert!(got[1].data.is_empty());
    }

    #[test]
    fn empty_pull_skips_acknowledge() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/projects/p/subscriptions/s:pull");
            then.status(200).body("{}");
        });
        let ack = server.mock(|when, then| {
            when.method(POST).path("/v1/projects/p/subscriptions/s:acknowledge");
            then.status(200).body("{}");
        });

        assert!(puller(&server).pull().unwrap().is_empty());
        ack.assert_calls(0);
    }

    #[test]
    fn server_errors_are_unavailable() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/projects/p/subscriptions/s:pull");
            then.status(503).body("busy");
        });
        assert!(matches!(
            puller(&server).pull(),
            Err(ProviderError::Unavailable(_))
        ));
    }
}
