use serde::{Deserialize, Deserializer};

use crate::domain::email::MessageId;
use crate::error::ProviderError;

/// Result of a successful watch registration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchResponse {
    #[serde(deserialize_with = "de_u64")]
    pub history_id: u64,
    /// Epoch milliseconds.
    #[serde(rename = "expiration", deserialize_with = "de_i64")]
    pub expiration_ms: i64,
}

/// One `messagesAdded` entry of the provider change log, flattened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub message_id: MessageId,
    pub labels: Vec<String>,
}

/// One page of the change log starting at some cursor.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub changes: Vec<ChangeRecord>,
    /// Position of the mailbox at the time of the query.
    pub history_id: Option<u64>,
    pub next_page_token: Option<String>,
}

/// A message as returned by `messages.get?format=full`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub payload: MessagePart,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartBody {
    #[serde(default)]
    pub data: Option<String>,
}

impl MessagePart {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn data(&self) -> Option<&str> {
        self.body.as_ref().and_then(|b| b.data.as_deref())
    }
}

/// Mailbox provider operations the pipeline depends on.
pub trait MailProvider: Send + Sync {
    /// Register (or re-register) push notifications for `label` to `topic`.
    fn watch(&self, label: &str, topic: &str) -> Result<WatchResponse, ProviderError>;

    /// Read one page of the change log from `start_history_id`.
    fn list_history(
        &self,
        start_history_id: u64,
        label: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, ProviderError>;

    fn get_message(&self, id: &str) -> Result<RawMessage, ProviderError>;

    /// Ids of unread messages carrying `label`, newest first.
    fn list_unread(&self, label: &str, max_results: u32)
    -> Result<Vec<MessageId>, ProviderError>;
}

/// Google encodes 64-bit integers as JSON strings; accept either form.
pub(crate) fn de_u64<'de, D>(d: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom("expected unsigned integer")),
        serde_json::Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "expected integer or numeric string, got {other}"
        ))),
    }
}

pub(crate) fn de_i64<'de, D>(d: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("expected integer")),
        serde_json::Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "expected integer or numeric string, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_response_accepts_string_numbers() {
        let w: WatchResponse =
            serde_json::from_str(r#"{"historyId":"1234","expiration":"1431990098200"}"#).unwrap();
        assert_eq!(w.history_id, 1234);
        assert_eq!(w.expiration_ms, 1_431_990_098_200);

        let w: WatchResponse =
            serde_json::from_str(r#"{"historyId":99,"expiration":5}"#).unwrap();
        assert_eq!(w.history_id, 99);
    }

    #[test]
    fn header_lookup_ignores_case() {
        let part: MessagePart = serde_json::from_str(
            r#"{"mimeType":"text/plain","headers":[{"name":"SUBJECT","value":"Hi"}]}"#,
        )
        .unwrap();
        assert_eq!(part.header("subject"), Some("Hi"));
        assert_eq!(part.header("from"), None);
        assert_eq!(part.data(), None);
    }
}
