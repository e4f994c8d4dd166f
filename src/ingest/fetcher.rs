use log::info;
use std::sync::Arc;

use crate::domain::email::MessageRecord;
use crate::error::{ProviderError, RelayError, RelayResult};
use crate::mail::decoders::{decode_mime_words, extract_body, normalize_body};
use crate::mail::provider::{MailProvider, RawMessage};

pub struct MessageFetcher {
    provider: Arc<dyn MailProvider>,
    max_body_chars: usize,
}

impl MessageFetcher {
    pub fn new(provider: Arc<dyn MailProvider>, max_body_chars: usize) -> Self {
        Self {
            provider,
            max_body_chars,
        }
    }

    pub fn fetch(&self, id: &str) -> RelayResult<MessageRecord> {
        let raw = self.provider.get_message(id).map_err(|e| match e {
            ProviderError::NotFound(_) => RelayError::NotFound(id.to_string()),
            other => RelayError::ProviderUnavailable(other.to_string()),
        })?;
        let record = normalize(id, raw, self.max_body_chars);
        info!("fetched email: {} from {}", record.subject, record.sender);
        Ok(record)
    }
}

/// Build the canonical record from a provider message.
pub fn normalize(id: &str, raw: RawMessage, max_body_chars: usize) -> MessageRecord {
    let header = |name: &str, default: &str| {
        raw.payload
            .header(name)
            .map(decode_mime_words)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    };

    MessageRecord {
        id: id.to_string(),
        sender: header("From", "Unknown"),
        subject: header("Subject", "No Subject"),
        received_at: header("Date", ""),
        body: normalize_body(&extract_body(&raw.payload), max_body_chars),
        snippet: raw.snippet.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine as _, engine::general_purpose};

    fn raw(json: serde_json::Value) -> RawMessage {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn headers_and_body_are_extracted() {
        let body = general_purpose::URL_SAFE_NO_PAD.encode("hello \n\n  world");
        let msg = raw(serde_json::json!({
            "id": "m1",
            "snippet": "hello world",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    {"name": "From", "value": "Ann <a@x.com>"},
                    {"name": "subject", "value": "Hi"},
                    {"name": "Date", "value": "Tue, 1 Jul 2025 10:00:00 +0000"}
                ],
                "parts": [
                    {"mimeType": "text/plain", "body": {"data": body}}
                ]
            }
        }));

        let rec = normalize("m1", msg, 5000);
        assert_eq!(rec.sender, "Ann <a@x.com>");
        assert_eq!(rec.subject, "Hi");
        assert_eq!(rec.received_at, "Tue, 1 Jul 2025 10:00:00 +0000");
        assert_eq!(rec.body, "hello world");
        assert_eq!(rec.snippet, "hello world");
    }

    #[test]
    fn missing_headers_and_body_use_defaults() {
        let rec = normalize("m2", raw(serde_json::json!({"id": "m2"})), 5000);
        assert_eq!(rec.sender, "Unknown");
        assert_eq!(rec.subject, "No Subject");
        assert_eq!(rec.received_at, "");
        assert_eq!(rec.body, "");
    }

    #[test]
    fn oversized_body_is_capped() {
        let body = general_purpose::URL_SAFE_NO_PAD.encode("z".repeat(6000));
        let msg = raw(serde_json::json!({
            "id": "m3",
            "payload": {"mimeType": "text/plain", "body": {"data": body}}
        }));
        assert_eq!(normalize("m3", msg, 5000).body.chars().count(), 5000);
    }
}
