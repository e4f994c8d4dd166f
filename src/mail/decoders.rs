use base64::{Engine as _, engine::general_purpose};

use crate::mail::provider::MessagePart;

/// Decode Gmail's base64url part data. Padding is optional on the wire.
/// Undecodable data yields an empty string.
pub fn decode_base64url(data: &str) -> String {
    let trimmed = data.trim().trim_end_matches('=');
    general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Body text by priority: first `text/plain` part, else the first
/// `text/html` part verbatim (markup is not stripped), else the payload's
/// own body for single-part messages.
pub fn extract_body(payload: &MessagePart) -> String {
    if payload.parts.is_empty() {
        return payload.data().map(decode_base64url).unwrap_or_default();
    }

    let mut html: Option<&str> = None;
    for part in &payload.parts {
        let mime = part.mime_type.to_ascii_lowercase();
        if mime == "text/plain"
            && let Some(data) = part.data()
        {
            return decode_base64url(data);
        }
        if mime == "text/html" && html.is_none() {
            html = part.data();
        }
    }

    html.map(decode_base64url).unwrap_or_default()
}

/// Collapse every whitespace run to one space and cap the length in chars.
pub fn normalize_body(raw: &str, max_chars: usize) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect()
}

/// RFC 2047 decoding of a header value (`=?utf-8?...?=`).
pub fn decode_mime_words(raw: &str) -> String {
    let mut line = b"X: ".to_vec();
    line.extend_from_slice(raw.as_bytes());
    line.extend_from_slice(b"\r\n");

    match mailparse::parse_header(&line) {
        Ok((h, _idx)) => h.get_value(),
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::provider::PartBody;

    fn enc(s: &str) -> String {
        general_purpose::URL_SAFE_NO_PAD.encode(s)
    }

    fn part(mime: &str, text: Option<&str>) -> MessagePart {
        MessagePart {
            mime_type: mime.to_string(),
            body: Some(PartBody {
                data: text.map(enc),
            }),
            ..MessagePart::default()
        }
    }

    #[test]
    fn plain_part_wins_over_earlier_html() {
        let payload = MessagePart {
            mime_type: "multipart/alternative".into(),
            parts: vec![
                part("text/html", Some("<p>html</p>")),
                part("text/plain", Some("plain")),
            ],
            ..MessagePart::default()
        };
        assert_eq!(extract_body(&payload), "plain");
    }

    #[test]
    fn html_fallback_keeps_markup() {
        let payload = MessagePart {
            mime_type: "multipart/alternative".into(),
            parts: vec![
                part("text/plain", None),
                part("text/html", Some("<b>bold</b>")),
                part("text/html", Some("<i>second</i>")),
            ],
            ..MessagePart::default()
        };
        assert_eq!(extract_body(&payload), "<b>bold</b>");
    }

    #[test]
    fn single_part_and_missing_body() {
        assert_eq!(extract_body(&part("text/plain", Some("solo"))), "solo");
        assert_eq!(extract_body(&MessagePart::default()), "");
    }

    #[test]
    fn padded_and_unpadded_base64_decode() {
        assert_eq!(decode_base64url("aGk="), "hi");
        assert_eq!(decode_base64url("aGk"), "hi");
        assert_eq!(decode_base64url("!!!"), "");
    }

    #[test]
    fn long_body_truncates_to_cap() {
        let raw = "ab  \n\t".repeat(1000) + &"x".repeat(6000);
        let out = normalize_body(&raw, 5000);
        assert_eq!(out.chars().count(), 5000);
        assert!(!out.contains("  "));
        assert!(!out.contains('\n'));

        assert_eq!(normalize_body(&"y".repeat(6000), 5000).len(), 5000);
    }

    #[test]
    fn truncation_counts_chars_not_bytes() {
        let out = normalize_body(&"é".repeat(10), 4);
        assert_eq!(out, "éééé");
    }

    #[test]
    fn encoded_words_decode() {
        assert_eq!(decode_mime_words("=?utf-8?q?caf=C3=A9?="), "café");
        assert_eq!(decode_mime_words("plain"), "plain");
    }
}
