//! Push subscription ("watch") lifecycle.
//!
//! A watch is only valid until the provider-reported expiry, so the lease is
//! re-registered once `now` enters the renewal margin before that instant.
//! The manager is shared between the notification loop and the renewal
//! thread behind a single `Mutex`; renewal is a check-then-replace under
//! that lock.

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::{RelayError, RelayResult};
use crate::mail::provider::MailProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchLease {
    pub subscription_target: String,
    pub expires_at: DateTime<Utc>,
    pub history_cursor: u64,
}

pub struct WatchLeaseManager {
    provider: Arc<dyn MailProvider>,
    label: String,
    topic: String,
    renewal_margin: Duration,
    lease: Option<WatchLease>,
}

pub type SharedLease = Arc<Mutex<WatchLeaseManager>>;

impl WatchLeaseManager {
    pub fn new(
        provider: Arc<dyn MailProvider>,
        label: impl Into<String>,
        topic: impl Into<String>,
        renewal_margin: Duration,
    ) -> Self {
        Self {
            provider,
            label: label.into(),
            topic: topic.into(),
            renewal_margin,
            lease: None,
        }
    }

    pub fn lease(&self) -> Option<&WatchLease> {
        self.lease.as_ref()
    }

    /// Register the watch and replace the stored lease. Failures propagate
    /// unchanged; there is no retry here.
    pub fn register(&mut self) -> RelayResult<WatchLease> {
        let resp = self
            .provider
            .watch(&self.label, &self.topic)
            .map_err(|e| RelayError::ProviderUnavailable(e.to_string()))?;

        let expires_at = DateTime::from_timestamp_millis(resp.expiration_ms).ok_or_else(|| {
            RelayError::ProviderUnavailable(format!(
                "watch returned invalid expiration {}",
                resp.expiration_ms
            ))
        })?;

        let lease = WatchLease {
            subscription_target: self.topic.clone(),
            expires_at,
            history_cursor: resp.history_id,
        };
        info!(
            "push notifications active until {} (history id {})",
            lease.expires_at, lease.history_cursor
        );
        self.lease = Some(lease.clone());
        Ok(lease)
    }

    /// True once `now` is inside the renewal margin, or when nothing has been
    /// registered yet.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match &self.lease {
            Some(lease) => now >= lease.expires_at - self.renewal_margin,
            None => true,
        }
    }

    pub fn maybe_renew(&mut self, now: DateTime<Utc>) -> RelayResult<Option<WatchLease>> {
        if !self.is_due(now) {
            return Ok(None);
        }
        info!("renewing push notification watch");
        self.register().map(Some)
    }
}

/// Drive `maybe_renew` once per `tick` until `running` goes false. Failures
/// are logged and retried on the next tick.
pub fn spawn_renewal(
    manager: SharedLease,
    tick: std::time::Duration,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let slice = std::time::Duration::from_millis(200).min(tick);
        let mut waited = std::time::Duration::ZERO;

        while running.load(Ordering::SeqCst) {
            thread::sleep(slice);
            waited += slice;
            if waited < tick {
                continue;
            }
            waited = std::time::Duration::ZERO;

            let outcome = match manager.lock() {
                Ok(mut m) => m.maybe_renew(Utc::now()),
                Err(poisoned) => poisoned.into_inner().maybe_renew(Utc::now()),
            };
            if let Err(e) = outcome {
                warn!("watch renewal failed, retrying next tick: {e}");
            }
        }
    })
}
