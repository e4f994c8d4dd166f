//! The relay control loop: startup, notification processing, renewal and
//! shutdown.

use anyhow::{Result, anyhow};
use chrono::Utc;
use log::{error, info, warn};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use crate::auth::token_manager::TokenManager;
use crate::config::{Config, Tuning, resolve_db_path};
use crate::delivery::DeliveryPipeline;
use crate::domain::email::DeliveryStats;
use crate::error::{RelayError, RelayResult};
use crate::ingest::decoder::NotificationDecoder;
use crate::ingest::fetcher::MessageFetcher;
use crate::ingest::pubsub::{NotificationSource, PubSubPuller};
use crate::mail::gmail_client::GmailClient;
use crate::mail::provider::MailProvider;
use crate::store::repo::CursorStore;
use crate::store::sqlite::SqliteStore;
use crate::summarizer::gemini::GeminiSummarizer;
use crate::summarizer::{Summarizer, Summary, summarize_or_fallback};
use crate::watch::{SharedLease, WatchLeaseManager, spawn_renewal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
}

/// Collaborators a relay is assembled from.
pub struct RelayParts {
    pub provider: Arc<dyn MailProvider>,
    pub store: Box<dyn CursorStore>,
    pub summarizer: Box<dyn Summarizer>,
    pub delivery: DeliveryPipeline,
    pub label: String,
    pub topic: String,
    pub tuning: Tuning,
}

pub struct Relay {
    state: RelayState,
    provider: Arc<dyn MailProvider>,
    lease: SharedLease,
    decoder: NotificationDecoder,
    fetcher: MessageFetcher,
    summarizer: Box<dyn Summarizer>,
    delivery: DeliveryPipeline,
    stats: DeliveryStats,
    label: String,
    tuning: Tuning,
}

impl Relay {
    pub fn new(parts: RelayParts) -> Self {
        let lease = WatchLeaseManager::new(
            parts.provider.clone(),
            parts.label.clone(),
            parts.topic,
            parts.tuning.renewal_margin(),
        );
        Self {
            state: RelayState::Initializing,
            decoder: NotificationDecoder::new(
                parts.provider.clone(),
                parts.store,
                parts.label.clone(),
            ),
            fetcher: MessageFetcher::new(parts.provider.clone(), parts.tuning.max_body_chars),
            provider: parts.provider,
            lease: Arc::new(Mutex::new(lease)),
            summarizer: parts.summarizer,
            delivery: parts.delivery,
            stats: DeliveryStats::default(),
            label: parts.label,
            tuning: parts.tuning,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn stats(&self) -> DeliveryStats {
        self.stats
    }

    pub fn lease(&self) -> SharedLease {
        self.lease.clone()
    }

    pub fn decoder(&self) -> &NotificationDecoder {
        &self.decoder
    }

    /// Bring every collaborator up. Any error here is fatal to the process.
    pub fn initialize(&mut self, process_existing: bool) -> RelayResult<()> {
        self.state = RelayState::Initializing;
        info!("initializing relay");

        self.summarizer.check_connection()?;

        let timeout = Duration::from_secs(self.tuning.startup_ready_timeout_secs);
        if !self.delivery.wait_until_ready(timeout) {
            return Err(RelayError::DeliveryFailed {
                attempts: 0,
                reason: format!("chat bridge not ready after {}s", timeout.as_secs()),
            });
        }

        let lease = match self.lease.lock() {
            Ok(mut m) => m.register()?,
            Err(poisoned) => poisoned.into_inner().register()?,
        };
        self.decoder.seed_cursor(lease.history_cursor)?;

        if process_existing {
            let n = self.drain_existing()?;
            info!("processed {n} existing unread message(s)");
        }

        self.state = RelayState::Running;
        info!("relay running, listening for new emails");
        Ok(())
    }

    /// Push unread messages already in the inbox through the same path as
    /// notified ones.
    pub fn drain_existing(&mut self) -> RelayResult<usize> {
        let ids = self
            .provider
            .list_unread(&self.label, self.tuning.existing_batch_limit)?;
        info!("found {} unread message(s)", ids.len());

        let mut handled = 0;
        for id in ids {
            if !self.decoder.claim(&id, Utc::now())? {
                continue;
            }
            self.process_message(&id);
            handled += 1;
        }
        Ok(handled)
    }

    /// Handle one push payload. Failures are logged and the notification is
    /// dropped; nothing here stops the relay.
    pub fn process_notification(&mut self, payload: &[u8]) {
        let now = Utc::now();
        if let Err(e) = self.decoder.compact_if_due(
            now,
            self.tuning.processed_retention(),
            self.tuning.compaction_interval(),
        ) {
            warn!("processed-id compaction failed: {e}");
        }

        let ids = match self.decoder.decode(payload, now) {
            Ok(ids) => ids,
            Err(e) => {
                warn!("notification ignored: {e}");
                return;
            }
        };
        if !ids.is_empty() {
            info!("found {} new message(s)", ids.len());
        }
        for id in ids {
            self.process_message(&id);
        }
    }

    /// Fetch, summarize and deliver one message, updating the counters.
    pub fn process_message(&mut self, id: &str) {
        info!("processing message {id}");
        let record = match self.fetcher.fetch(id) {
            Ok(r) => r,
            Err(RelayError::NotFound(_)) => {
                info!("message {id} no longer exists, skipping");
                return;
            }
            Err(e) => {
                error!("could not fetch message {id}: {e}");
                self.stats.errors += 1;
                return;
            }
        };
        self.stats.emails_processed += 1;

        let summary = summarize_or_fallback(self.summarizer.as_ref(), &record);
        if matches!(summary, Summary::Generated(_)) {
            self.stats.summaries_generated += 1;
        }

        match self.delivery.deliver(&record, summary.text()) {
            Ok(()) => {
                self.stats.messages_sent += 1;
                info!("message {id} relayed");
            }
            Err(e) => {
                error!("failed to relay message {id}: {e}");
                self.stats.errors += 1;
            }
        }
    }

    /// Pull and process notifications until `running` is cleared, with the
    /// lease renewal thread alongside. Returns the final counters.
    pub fn run(
        &mut self,
        source: &mut dyn NotificationSource,
        running: Arc<AtomicBool>,
    ) -> RelayResult<DeliveryStats> {
        if self.state != RelayState::Running {
            return Err(RelayError::Config(format!(
                "relay cannot run from state {:?}",
                self.state
            )));
        }

        let renewal = spawn_renewal(
            self.lease.clone(),
            self.tuning.renewal_tick(),
            running.clone(),
        );

        while running.load(Ordering::SeqCst) {
            match source.pull() {
                Ok(batch) => {
                    for envelope in batch {
                        // acked but unprocessed notifications are recovered
                        // from the stored cursor on the next start
                        if !running.load(Ordering::SeqCst) {
                            info!("interrupt received, leaving the rest of the batch");
                            break;
                        }
                        self.process_notification(&envelope.data);
                    }
                }
                Err(e) => {
                    warn!("pulling notifications failed: {e}");
                    sleep_while(&running, Duration::from_secs(self.tuning.retry_delay_secs));
                }
            }
        }

        self.state = RelayState::ShuttingDown;
        info!("shutting down");
        running.store(false, Ordering::SeqCst);
        if renewal.join().is_err() {
            warn!("renewal thread panicked");
        }

        self.state = RelayState::Stopped;
        info!("final statistics: {}", self.stats);
        Ok(self.stats)
    }
}

fn sleep_while(running: &AtomicBool, total: Duration) {
    let slice = Duration::from_millis(200);
    let mut waited = Duration::ZERO;
    while waited < total && running.load(Ordering::SeqCst) {
        thread::sleep(slice);
        waited += slice;
    }
}

/// Build the production relay from the config and run it until Ctrl-C.
pub fn run_relay(cfg: &Config) -> Result<DeliveryStats> {
    cfg.validate()?;

    let running = Arc::new(AtomicBool::new(true));
    let r2 = running.clone();
    ctrlc::set_handler(move || {
        r2.store(false, Ordering::SeqCst);
    })?;

    let tokens = Arc::new(TokenManager::from_config(cfg)?);
    let provider: Arc<dyn MailProvider> =
        Arc::new(GmailClient::new(&cfg.gmail.api_base, tokens.clone())?);
    let store = SqliteStore::open(&resolve_db_path(cfg)?)?;

    let mut relay = Relay::new(RelayParts {
        provider,
        store: Box::new(store),
        summarizer: Box::new(GeminiSummarizer::new(&cfg.summarizer)?),
        delivery: DeliveryPipeline::from_config(&cfg.bridge, &cfg.tuning)?,
        label: cfg.gmail.label.clone(),
        topic: cfg.pubsub.topic_path(),
        tuning: cfg.tuning.clone(),
    });
    relay
        .initialize(cfg.process_existing)
        .map_err(|e| anyhow!("startup failed: {e}"))?;

    let mut source = PubSubPuller::new(
        &cfg.pubsub.api_base,
        &cfg.pubsub.subscription_path(),
        cfg.pubsub.max_messages,
        Duration::from_secs(cfg.pubsub.pull_timeout_secs),
        tokens,
    )?;
    Ok(relay.run(&mut source, running)?)
}
