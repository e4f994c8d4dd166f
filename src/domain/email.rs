use serde::Serialize;

pub type MessageId = String;

/// Canonical content of one inbound message, built by the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub sender: String,
    pub subject: String,
    /// Raw `Date` header, empty when the message has none.
    pub received_at: String,
    pub body: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub emails_processed: u64,
    pub summaries_generated: u64,
    pub messages_sent: u64,
    pub errors: u64,
}

impl std::fmt::Display for DeliveryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "emails processed={} summaries generated={} messages sent={} errors={}",
            self.emails_processed, self.summaries_generated, self.messages_sent, self.errors
        )
    }
}
