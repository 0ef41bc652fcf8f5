//! Stale-state reaper
//!
//! The safety valve for calls whose terminating event never arrived. A
//! lost hangup would otherwise leave a call, and the phone number it
//! occupies, permanently "active", blocking every future call to that
//! number. Every thirty seconds the reaper:
//!
//! 1. evicts in-memory entries older than five minutes, and
//! 2. pages the durable store (batches of up to 100) for records stuck
//!    in CONNECTED for more than ten minutes and force-terminates them,
//!    with an audit entry that marks the cleanup as forced rather than
//!    organically observed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::CallEngineConfig;
use crate::error::Result;
use crate::store::{CallRecordStore, CallRecordUpdate, CallStatus, Disposition};

use super::registry::ActiveCallRegistry;

/// Periodically evicts abandoned in-memory state and force-terminates
/// stuck durable records.
pub struct StaleStateReaper {
    config: Arc<CallEngineConfig>,
    registry: Arc<ActiveCallRegistry>,
    store: Arc<dyn CallRecordStore>,
    reaped_calls: AtomicU64,
    forced_terminations: AtomicU64,
}

impl StaleStateReaper {
    pub fn new(
        config: Arc<CallEngineConfig>,
        registry: Arc<ActiveCallRegistry>,
        store: Arc<dyn CallRecordStore>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            reaped_calls: AtomicU64::new(0),
            forced_terminations: AtomicU64::new(0),
        }
    }

    /// One full reap pass. Errors abort the pass; the next tick retries.
    pub async fn tick(&self) -> Result<()> {
        self.reap_registry();
        self.reap_stuck_records().await
    }

    fn reap_registry(&self) {
        let evicted = self
            .registry
            .remove_older_than(self.config.reaper.active_call_max_age);
        if !evicted.is_empty() {
            self.reaped_calls
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            info!(
                "🧹 Evicted {} stale in-memory calls (no terminating event)",
                evicted.len()
            );
            for call in &evicted {
                debug!(
                    "Evicted call {} on channel {} after {}s",
                    call.call_id,
                    call.channel,
                    call.age_seconds()
                );
            }
        }
    }

    async fn reap_stuck_records(&self) -> Result<()> {
        let threshold = self.config.correlation.answered_duration_threshold.as_secs() as i64;
        loop {
            let batch = self
                .store
                .find_stuck(
                    CallStatus::Connected,
                    self.config.reaper.stuck_connected_after,
                    self.config.reaper.stuck_batch_size,
                )
                .await?;
            if batch.is_empty() {
                return Ok(());
            }

            let batch_len = batch.len();
            for record in batch {
                let duration_seconds = (Utc::now() - record.created_at).num_seconds().max(0);
                // Long-stuck but never hung up: charitably a no-answer if
                // it lived past the threshold, otherwise an outright
                // failure.
                let (disposition, status) = if duration_seconds > threshold {
                    (Disposition::NoAnswer, CallStatus::NoAnswer)
                } else {
                    (Disposition::Failed, CallStatus::Failed)
                };

                info!(
                    "🧹 Force-terminating stuck record {} (CONNECTED for >{}s) → {}/{}",
                    record.id,
                    self.config.reaper.stuck_connected_after.as_secs(),
                    disposition.as_str(),
                    status.as_str()
                );

                self.store
                    .update(
                        &record.id,
                        CallRecordUpdate::new()
                            .status(status)
                            .disposition(disposition)
                            .duration_seconds(duration_seconds)
                            .audit(
                                "ForcedCleanup",
                                json!({
                                    "forced": true,
                                    "reason": "stuck in CONNECTED with no hangup",
                                    "durationSeconds": duration_seconds,
                                }),
                            ),
                    )
                    .await?;
                self.forced_terminations.fetch_add(1, Ordering::Relaxed);
            }

            // A short batch means the scan is exhausted; a full one means
            // another page may be waiting.
            if batch_len < self.config.reaper.stuck_batch_size {
                return Ok(());
            }
        }
    }

    /// Spawn the 30-second reap loop. Tick failures are logged and simply
    /// retried on the next tick.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let reaper = self.clone();
        let interval = self.config.reaper.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = reaper.tick().await {
                    warn!("Reaper tick failed (will retry): {}", e);
                }
            }
        })
    }

    pub fn reaped_calls(&self) -> u64 {
        self.reaped_calls.load(Ordering::Relaxed)
    }

    pub fn forced_terminations(&self) -> u64 {
        self.forced_terminations.load(Ordering::Relaxed)
    }
}
