use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::Arc;

use crate::domain::email::MessageId;
use crate::error::{ProviderError, RelayError, RelayResult};
use crate::mail::provider::{ChangeRecord, MailProvider, de_u64};
use crate::store::repo::CursorStore;

/// Body of a provider push notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotification {
    #[serde(alias = "mailboxIdentity")]
    pub email_address: String,
    #[serde(alias = "historyPosition", deserialize_with = "de_u64")]
    pub history_id: u64,
}

pub fn parse_payload(payload: &[u8]) -> RelayResult<PushNotification> {
    serde_json::from_slice(payload).map_err(|e| RelayError::MalformedPayload(e.to_string()))
}

fn store_err(e: anyhow::Error) -> RelayError {
    RelayError::Store(format!("{e:#}"))
}

/// Turns push notifications into the ordered list of message ids that have
/// not been dispatched yet.
///
/// The stored cursor, not the notification's own position, decides where
/// the change-log query starts. The cursor advances only after every page
/// of the change log was read.
pub struct NotificationDecoder {
    provider: Arc<dyn MailProvider>,
    store: Box<dyn CursorStore>,
    label: String,
    last_compaction: Option<DateTime<Utc>>,
}

impl NotificationDecoder {
    pub fn new(
        provider: Arc<dyn MailProvider>,
        store: Box<dyn CursorStore>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            store,
            label: label.into(),
            last_compaction: None,
        }
    }

    pub fn cursor(&self) -> RelayResult<Option<u64>> {
        self.store.cursor().map_err(store_err)
    }

    /// Seed the cursor when the store has none (first run).
    pub fn seed_cursor(&mut self, history_id: u64) -> RelayResult<()> {
        if self.cursor()?.is_none() {
            info!("seeding history cursor at {history_id}");
            self.store.advance_cursor(history_id).map_err(store_err)?;
        }
        Ok(())
    }

    /// Record an id dispatched outside the notification path (backlog drain)
    /// so a later notification cannot dispatch it again. Returns false when
    /// it was already recorded.
    pub fn claim(&mut self, id: &str, now: DateTime<Utc>) -> RelayResult<bool> {
        if self.store.is_processed(id).map_err(store_err)? {
            return Ok(false);
        }
        self.store.mark_processed(id, now).map_err(store_err)?;
        Ok(true)
    }

    pub fn decode(&mut self, payload: &[u8], now: DateTime<Utc>) -> RelayResult<Vec<MessageId>> {
        let note = parse_payload(payload)?;
        debug!(
            "push notification for {}, history id {}",
            note.email_address, note.history_id
        );

        let Some(start) = self.cursor()? else {
            self.seed_cursor(note.history_id)?;
            return Ok(Vec::new());
        };

        let (changes, latest) = match self.read_change_log(start) {
            Ok(v) => v,
            Err(ProviderError::NotFound(detail)) => {
                warn!(
                    "history cursor {start} expired ({detail}); resetting to {}",
                    note.history_id
                );
                self.store
                    .reset_cursor(note.history_id)
                    .map_err(store_err)?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(RelayError::ProviderUnavailable(e.to_string())),
        };

        let mut fresh = Vec::new();
        for change in changes {
            if !change.labels.iter().any(|l| l == &self.label) {
                continue;
            }
            if !self.claim(&change.message_id, now)? {
                debug!("skipping already processed message {}", change.message_id);
                continue;
            }
            fresh.push(change.message_id);
        }

        self.store
            .advance_cursor(latest.unwrap_or(note.history_id))
            .map_err(store_err)?;
        Ok(fresh)
    }

    fn read_change_log(
        &self,
        start: u64,
    ) -> Result<(Vec<ChangeRecord>, Option<u64>), ProviderError> {
        let mut changes = Vec::new();
        let mut latest = None;
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .provider
                .list_history(start, &self.label, page_token.as_deref())?;
            changes.extend(page.changes);
            latest = latest.max(page.history_id);
            match page.next_page_token {
                Some(tok) => page_token = Some(tok),
                None => break,
            }
        }
        Ok((changes, latest))
    }

    /// Drop processed ids older than `retention`, at most once per `every`.
    pub fn compact_if_due(
        &mut self,
        now: DateTime<Utc>,
        retention: Duration,
        every: Duration,
    ) -> RelayResult<usize> {
        if self.last_compaction.is_some_and(|t| now - t < every) {
            return Ok(0);
        }
        self.last_compaction = Some(now);
        let removed = self.store.compact(now - retention).map_err(store_err)?;
        if removed > 0 {
            info!("compacted {removed} processed id(s) older than {retention}");
        }
        Ok(removed)
    }
}
