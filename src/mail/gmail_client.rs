use log::debug;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AccessTokenSource;
use crate::domain::email::MessageId;
use crate::error::ProviderError;
use crate::mail::provider::{ChangeRecord, HistoryPage, MailProvider, RawMessage, WatchResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    #[serde(default)]
    history: Vec<HistoryRecord>,
    #[serde(default)]
    history_id: Option<String>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord {
    #[serde(default)]
    messages_added: Vec<HistoryMessage>,
}

#[derive(Debug, Deserialize)]
struct HistoryMessage {
    message: MessageRef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRef {
    id: String,
    #[serde(default)]
    label_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

/// Blocking client for the Gmail REST API, scoped to the authorized user.
pub struct GmailClient {
    http: Client,
    base_url: String,
    tokens: Arc<dyn AccessTokenSource>,
}

impl GmailClient {
    /// `api_base` is e.g. `https://gmail.googleapis.com/gmail/v1`.
    pub fn new(api_base: &str, tokens: Arc<dyn AccessTokenSource>) -> Result<Self, ProviderError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: format!("{}/users/me", api_base.trim_end_matches('/')),
            tokens,
        })
    }

    fn authed(&self, rb: RequestBuilder) -> Result<RequestBuilder, ProviderError> {
        Ok(rb.bearer_auth(self.tokens.access_token()?))
    }

    fn check(resp: Response, context: &str) -> Result<Response, ProviderError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        Err(ProviderError::from_status(status, context, &body))
    }
}

impl MailProvider for GmailClient {
    fn watch(&self, label: &str, topic: &str) -> Result<WatchResponse, ProviderError> {
        let rb = self.http.post(format!("{}/watch", self.base_url)).json(&serde_json::json!({
            "labelIds": [label],
            "topicName": topic,
            "labelFilterBehavior": "INCLUDE",
        }));
        let resp = Self::check(self.authed(rb)?.send()?, "Gmail watch")?;
        Ok(resp.json()?)
    }

    fn list_history(
        &self,
        start_history_id: u64,
        label: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, ProviderError> {
        let mut query: Vec<(&str, String)> = vec![
            ("startHistoryId", start_history_id.to_string()),
            ("historyTypes", "messageAdded".to_string()),
            ("labelId", label.to_string()),
        ];
        if let Some(tok) = page_token {
            query.push(("pageToken", tok.to_string()));
        }

        let rb = self
            .http
            .get(format!("{}/history", self.base_url))
            .query(&query);
        let resp = Self::check(self.authed(rb)?.send()?, "Gmail history.list")?;
        let raw: HistoryResponse = resp.json()?;
        debug!(
            "history page from {start_history_id}: {} record(s)",
            raw.history.len()
        );

        let mut changes = Vec::new();
        for rec in raw.history {
            changes.extend(rec.messages_added.into_iter().map(|m| ChangeRecord {
                message_id: m.message.id,
                labels: m.message.label_ids,
            }));
        }

        Ok(HistoryPage {
            changes,
            history_id: raw.history_id.and_then(|s| s.parse().ok()),
            next_page_token: raw.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    fn get_message(&self, id: &str) -> Result<RawMessage, ProviderError> {
        // ids are opaque hex strings; refuse anything that could escape the path
        if id.is_empty() || id.contains(['/', '\\', '?', '#']) || id.contains("..") {
            return Err(ProviderError::NotFound(format!("invalid message id {id:?}")));
        }
        let rb = self
            .http
            .get(format!("{}/messages/{}", self.base_url, id))
            .query(&[("format", "full")]);
        let resp = Self::check(self.authed(rb)?.send()?, "Gmail messages.get")?;
        Ok(resp.json()?)
    }

    fn list_unread(
        &self,
        label: &str,
        max_results: u32,
    ) -> Result<Vec<MessageId>, ProviderError> {
        let rb = self.http.get(format!("{}/messages", self.base_url)).query(&[
            ("labelIds", label.to_string()),
            ("labelIds", "UNREAD".to_string()),
            ("maxResults", max_results.to_string()),
        ]);
        let resp = Self::check(self.authed(rb)?.send()?, "Gmail messages.list")?;
        let list: ListResponse = resp.json()?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;

    fn client(server: &MockServer) -> GmailClient {
        GmailClient::new(&server.base_url(), Arc::new(StaticToken("tok".into()))).unwrap()
    }

    #[test]
    fn watch_posts_label_and_topic() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/users/me/watch")
                .header("authorization", "Bearer tok")
                .json_body_includes(serde_json::json!({
                    "labelIds": ["INBOX"],
                    "topicName": "projects/p/topics/t",
                }).to_string());
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"historyId":"500","expiration":"1700000000000"}"#);
        });

        let w = client(&server).watch("INBOX", "projects/p/topics/t").unwrap();
        m.assert();
        assert_eq!(w.history_id, 500);
        assert_eq!(w.expiration_ms, 1_700_000_000_000);
    }

    #[test]
    fn history_is_flattened_in_order() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/users/me/history")
                .query_param("startHistoryId", "10")
                .query_param("historyTypes", "messageAdded");
            then.status(200)
                .header("content-type", "application/json")
                .body(
                    r#"{"history":[
                        {"id":"11","messagesAdded":[{"message":{"id":"A","labelIds":["INBOX"]}}]},
                        {"id":"12","messagesAdded":[{"message":{"id":"B","labelIds":["SENT"]}},
                                                    {"message":{"id":"C","labelIds":["INBOX","UNREAD"]}}]},
                        {"id":"13","labelsAdded":[{"message":{"id":"A","labelIds":["INBOX","STARRED"]}}]}
                      ],
                      "historyId":"13","nextPageToken":"next"}"#,
                );
        });

        let page = client(&server).list_history(10, "INBOX", None).unwrap();
        let ids: Vec<_> = page.changes.iter().map(|c| c.message_id.as_str()).collect();
        assert_eq!(ids, ["A", "B", "C"]);
        assert_eq!(page.history_id, Some(13));
        assert_eq!(page.next_page_token.as_deref(), Some("next"));
        assert_eq!(page.changes[1].labels, vec!["SENT".to_string()]);
    }

    #[test]
    fn status_codes_are_classified() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/users/me/messages/gone");
            then.status(404).body("not found");
        });
        server.mock(|when, then| {
            when.method(GET).path("/users/me/history");
            then.status(500).body("backend error");
        });

        let c = client(&server);
        assert!(matches!(
            c.get_message("gone"),
            Err(ProviderError::NotFound(_))
        ));
        assert!(matches!(
            c.list_history(1, "INBOX", None),
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[test]
    fn suspicious_ids_never_reach_the_network() {
        let server = MockServer::start();
        assert!(matches!(
            client(&server).get_message("../labels"),
            Err(ProviderError::NotFound(_))
        ));
    }

    #[test]
    fn unread_listing_returns_ids() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/users/me/messages")
                .query_param("maxResults", "10");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"messages":[{"id":"x1","threadId":"t"},{"id":"x2","threadId":"t"}]}"#);
        });
        assert_eq!(
            client(&server).list_unread("INBOX", 10).unwrap(),
            vec!["x1".to_string(), "x2".to_string()]
        );
    }
}
