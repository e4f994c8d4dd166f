use log::{debug, info, warn};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::{SummarizerConfig, SummaryStyle};
use crate::domain::email::MessageRecord;
use crate::error::{RelayError, RelayResult};
use crate::summarizer::{Summarizer, build_prompt};

const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

/// Fixed-window request counter.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window_start: Option<Instant>,
    count: u32,
}

impl RateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            window_start: None,
            count: 0,
        }
    }

    /// Count one request at `now`; returns how long to wait first, if at all.
    pub fn admit(&mut self, now: Instant) -> Option<Duration> {
        let start = *self.window_start.get_or_insert(now);
        if now.duration_since(start) > RATE_WINDOW {
            self.window_start = Some(now);
            self.count = 0;
        }

        let mut wait = None;
        if self.count >= self.limit {
            let remaining = RATE_WINDOW.saturating_sub(now.duration_since(start));
            if !remaining.is_zero() {
                wait = Some(remaining);
            }
            self.window_start = Some(now + remaining);
            self.count = 0;
        }
        self.count += 1;
        wait
    }
}

pub struct GeminiSummarizer {
    http: Client,
    endpoint: String,
    api_key: String,
    style: SummaryStyle,
    limiter: Mutex<RateLimiter>,
}

impl GeminiSummarizer {
    pub fn new(cfg: &SummarizerConfig) -> RelayResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| RelayError::Config(format!("http client: {e}")))?;
        info!("initialized Gemini summarizer with model {}", cfg.model);
        Ok(Self {
            http,
            endpoint: format!(
                "{}/v1beta/models/{}:generateContent",
                cfg.api_base.trim_end_matches('/'),
                cfg.model
            ),
            api_key: cfg.api_key.clone(),
            style: cfg.style,
            limiter: Mutex::new(RateLimiter::new(cfg.requests_per_minute)),
        })
    }

    fn throttle(&self) {
        let wait = match self.limiter.lock() {
            Ok(mut l) => l.admit(Instant::now()),
            Err(poisoned) => poisoned.into_inner().admit(Instant::now()),
        };
        if let Some(d) = wait {
            warn!("rate limit approaching, waiting {:.1}s", d.as_secs_f64());
            std::thread::sleep(d);
        }
    }

    fn generate(&self, prompt: &str) -> RelayResult<String> {
        let failed = |e: String| RelayError::SummarizationFailed(e);

        let resp = self
            .http
            .post(&self.endpoint)
            .query(&[("key", &self.api_key)])
            .json(&serde_json::json!({
                "contents": [{ "parts": [{ "text": prompt }] }]
            }))
            .send()
            .map_err(|e| failed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            return Err(failed(format!("Gemini returned {status}: {body}")));
        }

        let parsed: GenerateResponse = resp.json().map_err(|e| failed(e.to_string()))?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(failed("empty response".to_string()));
        }
        Ok(text)
    }
}

impl Summarizer for GeminiSummarizer {
    fn summarize(&self, record: &MessageRecord) -> RelayResult<String> {
        self.throttle();
        let prompt = build_prompt(self.style, record);
        info!("generating summary for email: {}", record.subject);
        debug!("prompt length: {} characters", prompt.len());

        let summary = self.generate(&prompt)?;
        info!("summary generated ({} chars)", summary.chars().count());
        Ok(summary)
    }

    fn check_connection(&self) -> RelayResult<()> {
        let reply = self.generate("Say 'Hello' in one word.")?;
        info!("Gemini connection ok: {reply}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::POST;
    use httpmock::MockServer;

    fn summarizer(server: &MockServer) -> GeminiSummarizer {
        GeminiSummarizer::new(&SummarizerConfig {
            api_key: "k".into(),
            model: "gemini-pro".into(),
            api_base: server.base_url(),
            ..SummarizerConfig::default()
        })
        .unwrap()
    }

    fn record() -> MessageRecord {
        MessageRecord {
            id: "m1".into(),
            sender: "a@x.com".into(),
            subject: "Budget".into(),
            received_at: String::new(),
            body: "Please approve by Friday".into(),
            snippet: String::new(),
        }
    }

    #[test]
    fn summary_text_is_joined_and_trimmed() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/v1beta/models/gemini-pro:generateContent")
                .query_param("key", "k")
                .body_includes("Please approve by Friday");
            then.status(200).json_body(serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": " Approve "}, {"text": "budget. "}]}}]
            }));
        });

        assert_eq!(summarizer(&server).summarize(&record()).unwrap(), "Approve budget.");
        m.assert();
    }

    #[test]
    fn errors_become_summarization_failed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(429).body("quota");
        });
        assert!(matches!(
            summarizer(&server).summarize(&record()),
            Err(RelayError::SummarizationFailed(_))
        ));
    }

    #[test]
    fn empty_candidates_fail() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200).json_body(serde_json::json!({"candidates": []}));
        });
        assert!(summarizer(&server).check_connection().is_err());
    }

    #[test]
    fn limiter_waits_once_window_is_full() {
        let mut l = RateLimiter::new(2);
        let t0 = Instant::now();
        assert_eq!(l.admit(t0), None);
        assert_eq!(l.admit(t0 + Duration::from_secs(1)), None);
        let wait = l.admit(t0 + Duration::from_secs(10)).unwrap();
        assert_eq!(wait, Duration::from_secs(50));
        // a fresh window starts after the wait
        assert_eq!(l.admit(t0 + Duration::from_secs(61)), None);
    }
}
