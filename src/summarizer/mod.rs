//! Summary text for a message. The model call itself is opaque to the
//! pipeline; when it fails a deterministic rendering of sender, subject and
//! snippet is used so delivery never waits on the model.

pub mod gemini;

use log::{info, warn};

use crate::config::SummaryStyle;
use crate::domain::email::MessageRecord;
use crate::error::RelayResult;

const FALLBACK_SNIPPET_CHARS: usize = 150;

pub trait Summarizer: Send {
    /// Fails with `RelayError::SummarizationFailed`.
    fn summarize(&self, record: &MessageRecord) -> RelayResult<String>;

    /// Cheap round trip used at startup and by `check`.
    fn check_connection(&self) -> RelayResult<()>;
}

/// Where a summary came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Summary {
    Generated(String),
    Fallback(String),
}

impl Summary {
    pub fn text(&self) -> &str {
        match self {
            Summary::Generated(t) | Summary::Fallback(t) => t,
        }
    }
}

pub fn summarize_or_fallback(summarizer: &dyn Summarizer, record: &MessageRecord) -> Summary {
    match summarizer.summarize(record) {
        Ok(text) => Summary::Generated(text),
        Err(e) => {
            warn!("{e}; using fallback summary for {}", record.id);
            Summary::Fallback(fallback_summary(record))
        }
    }
}

/// Plain rendering used when the model is unavailable.
pub fn fallback_summary(record: &MessageRecord) -> String {
    let mut out = format!(
        "Email from {}\nSubject: {}\n",
        sender_address(&record.sender),
        record.subject
    );

    let snippet = record.snippet.trim();
    if !snippet.is_empty() {
        out.push('\n');
        if snippet.chars().count() > FALLBACK_SNIPPET_CHARS {
            out.extend(snippet.chars().take(FALLBACK_SNIPPET_CHARS));
            out.push_str("...");
        } else {
            out.push_str(snippet);
        }
    }
    info!("using fallback summary (AI unavailable)");
    out
}

/// `Name <addr@host>` -> `addr@host`; anything else unchanged.
pub fn sender_address(sender: &str) -> &str {
    match (sender.find('<'), sender.rfind('>')) {
        (Some(open), Some(close)) if open < close => &sender[open + 1..close],
        _ => sender,
    }
}

/// Prompt for `style`, with the record's fields filled in.
pub fn build_prompt(style: SummaryStyle, record: &MessageRecord) -> String {
    let body = if record.body.is_empty() {
        &record.snippet
    } else {
        &record.body
    };
    let (instructions, closing) = match style {
        SummaryStyle::Brief => (
            "Summarize this email in ONE concise sentence.\nInclude only the most critical information.",
            "Provide only the summary, no additional text.",
        ),
        SummaryStyle::Standard => (
            "Summarize this email in 2-3 clear sentences.\nInclude: who sent it, what it's about, and any action needed.",
            "Format for WhatsApp messaging. Be concise and actionable.",
        ),
        SummaryStyle::Detailed => (
            "Provide a comprehensive summary of this email.\nInclude: sender, main topic, key points, and any action items or deadlines.",
            "Format the summary for WhatsApp with clear structure. Use bullet points if needed.",
        ),
    };
    format!(
        "{instructions}\n\nFrom: {}\nSubject: {}\nBody: {body}\n\n{closing}",
        record.sender, record.subject
    )
}
