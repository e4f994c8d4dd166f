use chrono::{DateTime, Local, TimeZone};

use crate::domain::email::MessageRecord;

const TIMESTAMP_FORMAT: &str = "%I:%M %p, %b %d";

/// Chat message for one email.
pub fn format_message(record: &MessageRecord, summary: &str, now: DateTime<Local>) -> String {
    format!(
        "📧 *New Email*\n\n\
         👤 *From:* {}\n\n\
         📌 *Subject:* {}\n\n\
         📝 *Summary:*\n{}\n\n\
         🕐 *Received:* {}",
        record.sender,
        record.subject,
        summary,
        format_timestamp(&record.received_at, now)
    )
}

/// Render a `Date` header in local time; `now` when it cannot be parsed.
pub fn format_timestamp(date_header: &str, now: DateTime<Local>) -> String {
    let parsed = Some(date_header.trim())
        .filter(|d| !d.is_empty())
        .and_then(|d| mailparse::dateparse(d).ok())
        .and_then(|secs| Local.timestamp_opt(secs, 0).single());
    parsed.unwrap_or(now).format(TIMESTAMP_FORMAT).to_string()
}
