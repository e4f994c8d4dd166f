use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mail_relay::config::Tuning;
use mail_relay::daemon::{Relay, RelayParts, RelayState};
use mail_relay::delivery::bridge::BridgeClient;
use mail_relay::delivery::{DeliveryPipeline, DeliverySettings};
use mail_relay::domain::email::{DeliveryStats, MessageId, MessageRecord};
use mail_relay::error::{ProviderError, RelayError, RelayResult};
use mail_relay::mail::provider::{
    ChangeRecord, HistoryPage, MailProvider, RawMessage, WatchResponse,
};
use mail_relay::store::memory::MemoryStore;
use mail_relay::summarizer::Summarizer;

/// Mailbox whose change log always reports `added`, whatever the cursor.
#[derive(Default)]
struct Mailbox {
    added: Vec<MessageId>,
    messages: HashMap<MessageId, RawMessage>,
    unavailable: Vec<MessageId>,
    unread: Vec<MessageId>,
}

impl Mailbox {
    fn with_message(mut self, id: &str, from: &str, subject: &str, body: &str) -> Self {
        let raw: RawMessage = serde_json::from_value(serde_json::json!({
            "id": id,
            "snippet": body,
            "payload": {
                "mimeType": "text/plain",
                "headers": [
                    {"name": "From", "value": from},
                    {"name": "Subject", "value": subject}
                ],
                "body": {"data": general_purpose::URL_SAFE_NO_PAD.encode(body)}
            }
        }))
        .unwrap();
        self.messages.insert(id.to_string(), raw);
        self
    }
}

impl MailProvider for Mailbox {
    fn watch(&self, _: &str, _: &str) -> Result<WatchResponse, ProviderError> {
        Ok(WatchResponse {
            history_id: 100,
            expiration_ms: (Utc::now() + chrono::Duration::days(7)).timestamp_millis(),
        })
    }

    fn list_history(
        &self,
        _: u64,
        label: &str,
        _: Option<&str>,
    ) -> Result<HistoryPage, ProviderError> {
        Ok(HistoryPage {
            changes: self
                .added
                .iter()
                .map(|id| ChangeRecord {
                    message_id: id.clone(),
                    labels: vec![label.to_string()],
                })
                .collect(),
            history_id: Some(200),
            next_page_token: None,
        })
    }

    fn get_message(&self, id: &str) -> Result<RawMessage, ProviderError> {
        if self.unavailable.iter().any(|u| u == id) {
            return Err(ProviderError::Unavailable("backend error".into()));
        }
        self.messages
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    fn list_unread(&self, _: &str, max: u32) -> Result<Vec<MessageId>, ProviderError> {
        Ok(self.unread.iter().take(max as usize).cloned().collect())
    }
}

struct QuotaExceeded;

impl Summarizer for QuotaExceeded {
    fn summarize(&self, _: &MessageRecord) -> RelayResult<String> {
        Err(RelayError::SummarizationFailed("quota exceeded".into()))
    }
    fn check_connection(&self) -> RelayResult<()> {
        Ok(())
    }
}

struct Subject;

impl Summarizer for Subject {
    fn summarize(&self, r: &MessageRecord) -> RelayResult<String> {
        Ok(format!("About {}", r.subject))
    }
    fn check_connection(&self) -> RelayResult<()> {
        Ok(())
    }
}

fn ready_bridge(server: &MockServer) {
    server.mock(|when, then| {
        when.method(GET).path("/health");
        then.status(200)
            .json_body(serde_json::json!({"status": "ready"}));
    });
}

fn relay(server: &MockServer, mailbox: Mailbox, summarizer: Box<dyn Summarizer>) -> Relay {
    let bridge = BridgeClient::new(&server.base_url(), Duration::from_secs(5)).unwrap();
    let settings = DeliverySettings {
        poll_interval: Duration::from_millis(10),
        ready_timeout: Duration::from_millis(50),
        resend_ready_timeout: Duration::from_millis(50),
        max_retries: 3,
        retry_delay: Duration::ZERO,
    };
    Relay::new(RelayParts {
        provider: Arc::new(mailbox),
        store: Box::new(MemoryStore::new()),
        summarizer,
        delivery: DeliveryPipeline::new(bridge, "+15550001111", settings),
        label: "INBOX".into(),
        topic: "projects/p/topics/t".into(),
        tuning: Tuning {
            startup_ready_timeout_secs: 1,
            ..Tuning::default()
        },
    })
}

const PAYLOAD: &[u8] = br#"{"emailAddress":"me@x.com","historyId":"101"}"#;

#[test]
fn summarizer_failure_still_delivers_fallback() {
    let server = MockServer::start();
    ready_bridge(&server);
    let send = server.mock(|when, then| {
        when.method(POST)
            .path("/send")
            .json_body_includes(serde_json::json!({"number": "+15550001111"}).to_string())
            .body_includes("Email from a@x.com")
            .body_includes("*Subject:* Hi");
        then.status(200)
            .json_body(serde_json::json!({"success": true}));
    });

    let mailbox = Mailbox {
        added: vec!["m1".into()],
        ..Mailbox::default()
    }
    .with_message("m1", "a@x.com", "Hi", "hello");

    let mut r = relay(&server, mailbox, Box::new(QuotaExceeded));
    r.initialize(false).unwrap();
    assert_eq!(r.state(), RelayState::Running);

    r.process_notification(PAYLOAD);

    send.assert_calls(1);
    assert_eq!(
        r.stats(),
        DeliveryStats {
            emails_processed: 1,
            summaries_generated: 0,
            messages_sent: 1,
            errors: 0,
        }
    );
    assert_eq!(r.decoder().cursor().unwrap(), Some(200));
}

#[test]
fn duplicate_notifications_deliver_once() {
    let server = MockServer::start();
    ready_bridge(&server);
    let send = server.mock(|when, then| {
        when.method(POST).path("/send");
        then.status(200)
            .json_body(serde_json::json!({"success": true}));
    });

    let mailbox = Mailbox {
        added: vec!["m1".into()],
        ..Mailbox::default()
    }
    .with_message("m1", "a@x.com", "Hi", "hello");

    let mut r = relay(&server, mailbox, Box::new(Subject));
    r.initialize(false).unwrap();
    r.process_notification(PAYLOAD);
    r.process_notification(PAYLOAD);

    send.assert_calls(1);
    assert_eq!(r.stats().messages_sent, 1);
    assert_eq!(r.stats().summaries_generated, 1);
}

#[test]
fn every_new_message_is_delivered() {
    let server = MockServer::start();
    ready_bridge(&server);
    let mocks: Vec<_> = ["Alpha", "Beta", "Gamma"]
        .iter()
        .map(|subject| {
            server.mock(|when, then| {
                when.method(POST)
                    .path("/send")
                    .body_includes(format!("About {subject}"));
                then.status(200)
                    .json_body(serde_json::json!({"success": true}));
            })
        })
        .collect();

    let mailbox = Mailbox {
        added: vec!["a".into(), "b".into(), "c".into()],
        ..Mailbox::default()
    }
    .with_message("a", "x@x.com", "Alpha", "1")
    .with_message("b", "x@x.com", "Beta", "2")
    .with_message("c", "x@x.com", "Gamma", "3");

    let mut r = relay(&server, mailbox, Box::new(Subject));
    r.initialize(false).unwrap();
    r.process_notification(PAYLOAD);

    for m in &mocks {
        m.assert_calls(1);
    }
    assert_eq!(r.stats().messages_sent, 3);
}

#[test]
fn vanished_message_is_skipped_silently() {
    let server = MockServer::start();
    ready_bridge(&server);
    let send = server.mock(|when, then| {
        when.method(POST).path("/send");
        then.status(200)
            .json_body(serde_json::json!({"success": true}));
    });

    let mailbox = Mailbox {
        added: vec!["gone".into()],
        ..Mailbox::default()
    };
    let mut r = relay(&server, mailbox, Box::new(Subject));
    r.initialize(false).unwrap();
    r.process_notification(PAYLOAD);

    send.assert_calls(0);
    assert_eq!(r.stats(), DeliveryStats::default());
}

#[test]
fn fetch_and_delivery_failures_count_as_errors() {
    let server = MockServer::start();
    ready_bridge(&server);
    let send = server.mock(|when, then| {
        when.method(POST).path("/send");
        then.status(500).body("bridge crashed");
    });

    let mailbox = Mailbox {
        added: vec!["flaky".into(), "m1".into()],
        unavailable: vec!["flaky".into()],
        ..Mailbox::default()
    }
    .with_message("m1", "a@x.com", "Hi", "hello");

    let mut r = relay(&server, mailbox, Box::new(Subject));
    r.initialize(false).unwrap();
    r.process_notification(PAYLOAD);

    send.assert_calls(3);
    assert_eq!(
        r.stats(),
        DeliveryStats {
            emails_processed: 1,
            summaries_generated: 1,
            messages_sent: 0,
            errors: 2,
        }
    );
}

#[test]
fn malformed_notification_is_ignored() {
    let server = MockServer::start();
    ready_bridge(&server);

    let mut r = relay(&server, Mailbox::default(), Box::new(Subject));
    r.initialize(false).unwrap();
    r.process_notification(b"{\"unexpected\": true}");

    assert_eq!(r.stats(), DeliveryStats::default());
    assert_eq!(r.decoder().cursor().unwrap(), Some(100));
}

#[test]
fn existing_unread_messages_are_not_sent_twice() {
    let server = MockServer::start();
    ready_bridge(&server);
    let send = server.mock(|when, then| {
        when.method(POST).path("/send");
        then.status(200)
            .json_body(serde_json::json!({"success": true}));
    });

    let mailbox = Mailbox {
        added: vec!["m1".into()],
        unread: vec!["m1".into()],
        ..Mailbox::default()
    }
    .with_message("m1", "a@x.com", "Hi", "hello");

    let mut r = relay(&server, mailbox, Box::new(Subject));
    r.initialize(true).unwrap();
    assert_eq!(r.stats().messages_sent, 1);

    r.process_notification(PAYLOAD);
    send.assert_calls(1);
}
