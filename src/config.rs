use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::RelayError;

/// Effective maximum length (in characters) of a normalized message body.
pub const MAX_BODY_CHARS: usize = 5000;

const PLACEHOLDER_CLIENT_ID: &str = "YOUR_CLIENT_ID.apps.googleusercontent.com";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub gmail: GmailConfig,
    #[serde(default)]
    pub pubsub: PubSubConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub tuning: Tuning,
    pub db_path: Option<String>,
    #[serde(default)]
    pub process_existing: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GmailConfig {
    pub client_id: String,
    pub user_email: Option<String>,
    pub redirect_uri: String,
    /// Label the watch and the decoder filter on.
    pub label: String,
    pub api_base: String,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            client_id: PLACEHOLDER_CLIENT_ID.to_string(),
            user_email: None,
            redirect_uri: "http://127.0.0.1:8080/callback".to_string(),
            label: "INBOX".to_string(),
            api_base: "https://gmail.googleapis.com/gmail/v1".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PubSubConfig {
    pub project_id: String,
    pub topic: String,
    pub subscription: String,
    pub api_base: String,
    pub max_messages: u32,
    pub pull_timeout_secs: u64,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            topic: "gmail-notifications".to_string(),
            subscription: "gmail-sub".to_string(),
            api_base: "https://pubsub.googleapis.com".to_string(),
            max_messages: 10,
            pull_timeout_secs: 30,
        }
    }
}

impl PubSubConfig {
    pub fn topic_path(&self) -> String {
        format!("projects/{}/topics/{}", self.project_id, self.topic)
    }

    pub fn subscription_path(&self) -> String {
        format!(
            "projects/{}/subscriptions/{}",
            self.project_id, self.subscription
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStyle {
    Brief,
    #[default]
    Standard,
    Detailed,
}

impl std::str::FromStr for SummaryStyle {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brief" => Ok(SummaryStyle::Brief),
            "standard" => Ok(SummaryStyle::Standard),
            "detailed" => Ok(SummaryStyle::Detailed),
            other => Err(RelayError::Config(format!("unknown summary style '{other}'"))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SummarizerConfig {
    pub api_key: String,
    pub model: String,
    pub style: SummaryStyle,
    pub api_base: String,
    pub requests_per_minute: u32,
    pub timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gemini-pro".to_string(),
            style: SummaryStyle::Standard,
            api_base: "https://generativelanguage.googleapis.com".to_string(),
            // free tier allows 60/min; leave some headroom
            requests_per_minute: 55,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BridgeConfig {
    pub url: String,
    pub target_number: String,
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000".to_string(),
            target_number: String::new(),
            request_timeout_secs: 30,
        }
    }
}

/// Intervals, ceilings and caps of the pipeline. All values are seconds
/// unless the name says otherwise.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Tuning {
    pub renewal_margin_secs: u64,
    pub renewal_tick_secs: u64,
    pub health_poll_interval_secs: u64,
    pub ready_timeout_secs: u64,
    pub startup_ready_timeout_secs: u64,
    pub resend_ready_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub max_body_chars: usize,
    pub existing_batch_limit: u32,
    pub processed_retention_secs: u64,
    pub compaction_interval_secs: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            renewal_margin_secs: 60 * 60,
            renewal_tick_secs: 60,
            health_poll_interval_secs: 5,
            ready_timeout_secs: 60,
            startup_ready_timeout_secs: 120,
            resend_ready_timeout_secs: 30,
            max_retries: 3,
            retry_delay_secs: 5,
            max_body_chars: MAX_BODY_CHARS,
            existing_batch_limit: 10,
            processed_retention_secs: 7 * 24 * 60 * 60,
            compaction_interval_secs: 60 * 60,
        }
    }
}

/// Longest interval any tuning field may hold (ten years).
pub const MAX_INTERVAL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Clamped to `MAX_INTERVAL_SECS`, so the conversion cannot fail.
fn span(secs: u64) -> chrono::Duration {
    i64::try_from(secs.min(MAX_INTERVAL_SECS))
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or_default()
}

impl Tuning {
    pub fn renewal_margin(&self) -> chrono::Duration {
        span(self.renewal_margin_secs)
    }

    pub fn renewal_tick(&self) -> Duration {
        Duration::from_secs(self.renewal_tick_secs)
    }

    pub fn processed_retention(&self) -> chrono::Duration {
        span(self.processed_retention_secs)
    }

    pub fn compaction_interval(&self) -> chrono::Duration {
        span(self.compaction_interval_secs)
    }

    fn problems(&self, errors: &mut Vec<String>) {
        // polled in loops; zero would spin
        for (name, v) in [
            ("renewal_tick_secs", self.renewal_tick_secs),
            ("health_poll_interval_secs", self.health_poll_interval_secs),
        ] {
            if v == 0 {
                errors.push(format!("tuning.{name} must be at least 1"));
            }
        }
        for (name, v) in [
            ("renewal_margin_secs", self.renewal_margin_secs),
            ("renewal_tick_secs", self.renewal_tick_secs),
            ("health_poll_interval_secs", self.health_poll_interval_secs),
            ("ready_timeout_secs", self.ready_timeout_secs),
            ("startup_ready_timeout_secs", self.startup_ready_timeout_secs),
            ("resend_ready_timeout_secs", self.resend_ready_timeout_secs),
            ("retry_delay_secs", self.retry_delay_secs),
            ("processed_retention_secs", self.processed_retention_secs),
            ("compaction_interval_secs", self.compaction_interval_secs),
        ] {
            if v > MAX_INTERVAL_SECS {
                errors.push(format!(
                    "tuning.{name} must not exceed {MAX_INTERVAL_SECS} seconds"
                ));
            }
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Apply the environment overrides the operator may set instead of
    /// editing the file.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GEMINI_API_KEY") {
            self.summarizer.api_key = v;
        }
        if let Some(v) = lookup("YOUR_WHATSAPP_NUMBER") {
            self.bridge.target_number = v;
        }
        if let Some(v) = lookup("WHATSAPP_SERVICE_URL") {
            self.bridge.url = v;
        }
        if let Some(v) = lookup("PUBSUB_PROJECT_ID") {
            self.pubsub.project_id = v;
        }
        if let Some(v) = lookup("PUBSUB_TOPIC_NAME") {
            self.pubsub.topic = v;
        }
        if let Some(v) = lookup("PUBSUB_SUBSCRIPTION_NAME") {
            self.pubsub.subscription = v;
        }
        if let Some(v) = lookup("PROCESS_EXISTING") {
            self.process_existing = v.trim().eq_ignore_ascii_case("true");
        }
        if let Some(v) = lookup("SUMMARY_LENGTH")
            && let Ok(style) = v.parse()
        {
            self.summarizer.style = style;
        }
        if let Some(v) = lookup("MAX_RETRIES").and_then(|v| v.trim().parse().ok()) {
            self.tuning.max_retries = v;
        }
        if let Some(v) = lookup("RETRY_DELAY").and_then(|v| v.trim().parse().ok()) {
            self.tuning.retry_delay_secs = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = v.to_ascii_lowercase();
        }
    }

    /// Check every required field and report all problems at once.
    pub fn validate(&self) -> Result<(), RelayError> {
        let mut errors = Vec::new();

        if self.gmail.client_id.trim().is_empty() || self.gmail.client_id == PLACEHOLDER_CLIENT_ID
        {
            errors.push("gmail.client_id is not set".to_string());
        }
        if self
            .gmail
            .user_email
            .as_deref()
            .is_none_or(|e| e.trim().is_empty())
        {
            errors.push("gmail.user_email is not set".to_string());
        }
        if self.summarizer.api_key.trim().is_empty() {
            errors.push("GEMINI_API_KEY is not set".to_string());
        }
        if self.bridge.target_number.trim().is_empty() {
            errors.push("YOUR_WHATSAPP_NUMBER is not set".to_string());
        }
        if self.pubsub.project_id.trim().is_empty() {
            errors.push("PUBSUB_PROJECT_ID is not set".to_string());
        }
        if self.tuning.max_retries == 0 {
            errors.push("tuning.max_retries must be at least 1".to_string());
        }
        if self.tuning.max_body_chars == 0 {
            errors.push("tuning.max_body_chars must be positive".to_string());
        }
        self.tuning.problems(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            let lines: Vec<String> = errors.iter().map(|e| format!("  - {e}")).collect();
            Err(RelayError::Config(format!("\n{}", lines.join("\n"))))
        }
    }
}

fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("no config dir available"))?
        .join("mail_relay"))
}

pub fn config_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("config.toml");
    Ok(p)
}

pub fn default_db_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("relay.db");
    Ok(p)
}

/// Load the config file and apply environment overrides. A missing file is
/// replaced by an editable template and reported as an error.
pub fn load_config() -> Result<Config> {
    let path = config_path()?;
    if !path.exists() {
        let sample = Config {
            gmail: GmailConfig {
                user_email: Some("you@example.com".to_string()),
                ..GmailConfig::default()
            },
            log_level: default_log_level(),
            ..Config::default()
        };
        let tom = toml::to_string_pretty(&sample)?;
        fs::write(&path, tom)?;
        return Err(anyhow::anyhow!(
            "Created template config at {}; edit it and run again",
            path.display()
        ));
    }
    let s = fs::read_to_string(path)?;
    let mut cfg: Config = toml::from_str(&s)?;
    cfg.apply_env(|k| std::env::var(k).ok());
    Ok(cfg)
}

pub fn resolve_db_path(cfg: &Config) -> Result<PathBuf> {
    if let Some(p) = &cfg.db_path {
        Ok(PathBuf::from(p))
    } else {
        default_db_path()
    }
}
