//! Summary delivery to the chat bridge: readiness gate, formatting and a
//! bounded send loop.

pub mod bridge;
pub mod format;

use chrono::Local;
use log::{debug, error, info, warn};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{BridgeConfig, Tuning};
use crate::delivery::bridge::{BridgeClient, SendOutcome};
use crate::delivery::format::format_message;
use crate::domain::email::MessageRecord;
use crate::error::{RelayError, RelayResult};

/// Timing and attempt limits for one pipeline.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub poll_interval: Duration,
    pub ready_timeout: Duration,
    pub resend_ready_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl DeliverySettings {
    pub fn from_tuning(t: &Tuning) -> Self {
        Self {
            poll_interval: Duration::from_secs(t.health_poll_interval_secs),
            ready_timeout: Duration::from_secs(t.ready_timeout_secs),
            resend_ready_timeout: Duration::from_secs(t.resend_ready_timeout_secs),
            max_retries: t.max_retries.max(1),
            retry_delay: Duration::from_secs(t.retry_delay_secs),
        }
    }
}

pub struct DeliveryPipeline {
    bridge: BridgeClient,
    target_number: String,
    settings: DeliverySettings,
    gate_passed: bool,
}

impl DeliveryPipeline {
    pub fn new(bridge: BridgeClient, target_number: &str, settings: DeliverySettings) -> Self {
        info!("delivery pipeline initialized (bridge: {})", bridge.base_url());
        Self {
            bridge,
            target_number: target_number.to_string(),
            settings,
            gate_passed: false,
        }
    }

    pub fn from_config(cfg: &BridgeConfig, tuning: &Tuning) -> RelayResult<Self> {
        let bridge = BridgeClient::new(&cfg.url, Duration::from_secs(cfg.request_timeout_secs))
            .map_err(|e| RelayError::Config(format!("bridge client: {e}")))?;
        Ok(Self::new(
            bridge,
            &cfg.target_number,
            DeliverySettings::from_tuning(tuning),
        ))
    }

    pub fn bridge(&self) -> &BridgeClient {
        &self.bridge
    }

    /// Poll `/health` until it reports ready or `timeout` elapses. The
    /// health endpoint is always asked at least once.
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        info!("waiting for the chat bridge to be ready...");
        let deadline = Instant::now() + timeout;
        loop {
            match self.bridge.health() {
                Ok(h) if h.is_ready() => {
                    info!("chat bridge is ready");
                    return true;
                }
                Ok(h) => {
                    info!("bridge status: {}", h.status);
                    if h.needs_pairing() {
                        let hint = h
                            .pairing_hint
                            .unwrap_or_else(|| format!("{}/qr", self.bridge.base_url()));
                        warn!("bridge needs pairing: {hint}");
                    }
                }
                Err(e) => debug!("bridge not ready: {e}"),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(self.settings.poll_interval.min(deadline - now));
        }
        error!("timed out waiting for the chat bridge");
        false
    }

    /// Format and send one notification.
    pub fn deliver(&mut self, record: &MessageRecord, summary: &str) -> RelayResult<()> {
        let message = format_message(record, summary, Local::now());
        self.send(&message)
    }

    /// Send `message` to the configured number, passing the readiness gate
    /// first if this session has not yet.
    pub fn send(&mut self, message: &str) -> RelayResult<()> {
        if !self.gate_passed {
            if !self.wait_until_ready(self.settings.ready_timeout) {
                return Err(RelayError::DeliveryFailed {
                    attempts: 0,
                    reason: "bridge not ready".to_string(),
                });
            }
            self.gate_passed = true;
        }

        let max = self.settings.max_retries;
        info!("sending chat message to {}", self.target_number);
        let mut reason = String::new();

        for attempt in 1..=max {
            match self.bridge.send(&self.target_number, message) {
                Ok(SendOutcome::Sent) => {
                    info!("chat message sent");
                    return Ok(());
                }
                Ok(SendOutcome::NotReady) => {
                    warn!("bridge not ready (attempt {attempt}/{max}), waiting...");
                    if !self.wait_until_ready(self.settings.resend_ready_timeout) {
                        return Err(RelayError::DeliveryFailed {
                            attempts: attempt,
                            reason: "bridge did not become ready".to_string(),
                        });
                    }
                    reason = "bridge not ready".to_string();
                    continue;
                }
                Ok(SendOutcome::Rejected(r)) => {
                    error!("bridge rejected message (attempt {attempt}/{max}): {r}");
                    reason = r;
                }
                Err(e) => {
                    error!("request failed (attempt {attempt}/{max}): {e}");
                    reason = e.to_string();
                }
            }

            if attempt < max {
                info!("retrying in {}s", self.settings.retry_delay.as_secs());
                thread::sleep(self.settings.retry_delay);
            }
        }

        Err(RelayError::DeliveryFailed {
            attempts: max,
            reason,
        })
    }

    /// Ask the bridge for its test message; used by `check`.
    pub fn test_connection(&self) -> RelayResult<()> {
        match self.bridge.test() {
            Ok(SendOutcome::Sent) => {
                info!("bridge test message sent");
                Ok(())
            }
            Ok(SendOutcome::NotReady) => Err(RelayError::DeliveryFailed {
                attempts: 1,
                reason: "bridge not ready".to_string(),
            }),
            Ok(SendOutcome::Rejected(reason)) => {
                Err(RelayError::DeliveryFailed { attempts: 1, reason })
            }
            Err(e) => Err(RelayError::DeliveryFailed {
                attempts: 1,
                reason: e.to_string(),
            }),
        }
    }
}
