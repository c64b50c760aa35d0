//! The long-running poll cycle.
//!
//! One loop per tracked note: connect, subscribe, then repeatedly drain the
//! relay buffer and push every event through filter and dispatcher. Shutdown
//! is only observed between events, so a dispatch is never cut in half.

use super::state::{LoopControl, LoopState, MonitorHandle};
use crate::payment_core::{DispatchOutcome, FailureKind, PaymentBackend, PaymentDispatcher};
use crate::relay_core::{EventFilter, EventSource, SubscriptionFilter, TransportError};
use crate::short_id;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub target_post_id: String,
    pub amount_units: u64,
    pub relay_urls: Vec<String>,
    pub poll_interval: Duration,
    /// Pause after a transient error before the next cycle.
    pub error_backoff: Duration,
    pub max_consecutive_ledger_failures: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            target_post_id: String::new(),
            amount_units: 1,
            relay_urls: Vec::new(),
            poll_interval: Duration::from_millis(500),
            error_backoff: Duration::from_secs(5),
            max_consecutive_ledger_failures: 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("could not start monitoring: {0}")]
    Startup(TransportError),
    #[error("relay stream unusable: {0}")]
    Transport(TransportError),
    #[error("ledger failed {0} consecutive dispatches")]
    LedgerUnavailable(u32),
}

impl MonitorError {
    /// Process exit code for this failure: 1 for relay trouble, 2 when the
    /// payment ledger is gone.
    pub fn exit_code(&self) -> u8 {
        match self {
            MonitorError::Startup(_) | MonitorError::Transport(_) => 1,
            MonitorError::LedgerUnavailable(_) => 2,
        }
    }
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub events_seen: u64,
    pub qualifying: u64,
    pub paid: u64,
    pub skipped: u64,
    pub failed: u64,
}

pub struct MonitorLoop<S, B> {
    source: S,
    filter: EventFilter,
    dispatcher: PaymentDispatcher<B>,
    config: MonitorConfig,
    control: LoopControl,
    stats: MonitorStats,
    ledger_failures: u32,
}

impl<S: EventSource, B: PaymentBackend> MonitorLoop<S, B> {
    pub fn new(
        source: S,
        filter: EventFilter,
        dispatcher: PaymentDispatcher<B>,
        config: MonitorConfig,
    ) -> (Self, MonitorHandle) {
        let (control, handle) = LoopControl::new();
        let monitor = Self {
            source,
            filter,
            dispatcher,
            config,
            control,
            stats: MonitorStats::default(),
            ledger_failures: 0,
        };
        (monitor, handle)
    }

    /// Run until shutdown is requested or a fatal condition occurs.
    pub async fn run(mut self) -> Result<MonitorStats, MonitorError> {
        self.control.set_state(LoopState::Starting);
        log::info!("🚀 Starting repost monitor");
        log::info!("   ├─ Note: {}", self.config.target_post_id);
        log::info!("   ├─ Amount: {} units", self.config.amount_units);
        log::info!("   ├─ Relays: {}", self.config.relay_urls.len());
        log::info!("   └─ Source: {}", self.source.source_type());

        if let Err(e) = self.start().await {
            log::error!("❌ {}", e);
            self.source.close().await;
            self.control.set_state(LoopState::Stopped);
            return Err(e);
        }

        self.control.set_state(LoopState::Running);
        let result = self.run_cycles().await;

        self.control.set_state(LoopState::Draining);
        match &result {
            Ok(()) => log::info!("🔄 Shutdown requested, closing relay connections..."),
            Err(e) => log::error!("❌ Fatal: {}", e),
        }
        self.source.close().await;
        self.control.set_state(LoopState::Stopped);

        log::info!(
            "✅ Monitor stopped | events: {} | qualifying: {} | paid: {} | skipped: {} | failed: {}",
            self.stats.events_seen,
            self.stats.qualifying,
            self.stats.paid,
            self.stats.skipped,
            self.stats.failed
        );

        result.map(|()| self.stats)
    }

    async fn start(&mut self) -> Result<(), MonitorError> {
        let connected = self
            .source
            .connect(&self.config.relay_urls)
            .await
            .map_err(MonitorError::Startup)?;
        log::info!("✅ Connected to {}/{} relays", connected, self.config.relay_urls.len());

        let filter = SubscriptionFilter {
            kinds: self.filter.config().accepted_kinds.clone(),
            reference_tags: self.filter.config().reference_tags.clone(),
            target_post_id: self.filter.target_post_id().to_string(),
        };
        let subscription_id = self.source.subscribe(&filter).await.map_err(MonitorError::Startup)?;

        self.control.set_state(LoopState::Subscribed);
        log::info!("📡 Subscribed ({}) to reposts of {}", subscription_id, short_id(&filter.target_post_id));
        Ok(())
    }

    async fn run_cycles(&mut self) -> Result<(), MonitorError> {
        loop {
            if self.control.shutdown_requested() {
                return Ok(());
            }

            match self.source.drain().await {
                Ok(events) => {
                    for event in events {
                        if self.control.shutdown_requested() {
                            return Ok(());
                        }
                        self.stats.events_seen += 1;

                        let Some(qualifying) = self.filter.matches(&event) else {
                            continue;
                        };
                        self.stats.qualifying += 1;
                        log::info!(
                            "🔁 Repost by {} (kind {}, event {}{})",
                            short_id(&qualifying.actor_id),
                            qualifying.kind,
                            short_id(&qualifying.event_id),
                            if qualifying.has_comment() { ", with comment" } else { "" }
                        );

                        let outcome = self
                            .dispatcher
                            .dispatch(&qualifying.actor_id, &qualifying.target_post_id, self.config.amount_units)
                            .await;
                        self.record_outcome(&outcome)?;
                    }
                    self.pause(self.config.poll_interval).await;
                }
                Err(e) if e.is_fatal() => return Err(MonitorError::Transport(e)),
                Err(e) => {
                    log::warn!("⚠️  {} (retrying in {:?})", e, self.config.error_backoff);
                    self.pause(self.config.error_backoff).await;
                }
            }
        }
    }

    fn record_outcome(&mut self, outcome: &DispatchOutcome) -> Result<(), MonitorError> {
        match outcome {
            DispatchOutcome::Succeeded(_) => self.stats.paid += 1,
            DispatchOutcome::Skipped(_) => self.stats.skipped += 1,
            DispatchOutcome::Failed(_) => self.stats.failed += 1,
        }

        if *outcome == DispatchOutcome::Failed(FailureKind::Ledger) {
            self.ledger_failures += 1;
            if self.ledger_failures >= self.config.max_consecutive_ledger_failures {
                return Err(MonitorError::LedgerUnavailable(self.ledger_failures));
            }
        } else {
            self.ledger_failures = 0;
        }
        Ok(())
    }

    /// Sleep, waking early on shutdown.
    async fn pause(&mut self, duration: Duration) {
        tokio::select! {
            _ = sleep(duration) => {}
            _ = self.control.shutdown_signal() => {}
        }
    }
}
