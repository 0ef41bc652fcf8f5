//! # Event Correlation State Machine
//!
//! The heart of the engine. The manager emits a flat stream of typed
//! events, each referencing a call by one of several identifiers (the
//! PBX's own call id, a channel name, the correlation id embedded at
//! origination time, or as a last resort raw phone numbers) with no
//! guarantee all of them are populated, arrive in order, or arrive at
//! all. This module maps each event onto the in-memory registry and the
//! durable record, walking fallback lookups whenever the primary
//! identifier is unknown.
//!
//! ## Per-event behavior
//!
//! - **Newchannel**: tracked only for the designated dialplan context;
//!   creates and indexes the in-memory call, and attaches the fresh PBX
//!   call id to a recently created durable record that lacks one.
//! - **Newstate**: state `Up` is the answer signal; flags the call
//!   answered and advances the durable status to ANSWERED. Deliberately
//!   does **not** touch contact/lead status; that escalation belongs to
//!   successful transfers alone.
//! - **DialEnd**: records the dial result; busy/no-answer/cancel and
//!   friends map to fixed (disposition, status) pairs.
//! - **Bridge**: informational; stamps bridge state/time on whichever
//!   bridged call ids are tracked. Never touches status or disposition.
//! - **UserEvent**: application events raised from the dialplan,
//!   call-status progress, transfer outcomes, and the single place a
//!   contact can advance to "contacted".
//! - **Hangup**: terminal. Registry first, then durable record by call
//!   id, then by destination number, then by caller number (both inside
//!   a ten-minute window). Nothing found means the event cannot be
//!   attributed: log and drop. Resolution computes the duration, applies
//!   the answered heuristic, and fires the completion notification
//!   exactly once, best-effort.
//!
//! Handler errors are caught and logged per event; one failed store
//! write never blocks subsequent events for other calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, warn};

use ringline_ami_core::channel::{ChannelState, DialStatus, HangupCause};
use ringline_ami_core::event::AmiEvent;

use crate::config::CallEngineConfig;
use crate::contacts::ContactDirectory;
use crate::error::Result;
use crate::notifier::CompletionNotifier;
use crate::numbers::to_e164;
use crate::store::{CallRecord, CallRecordStore, CallRecordUpdate, CallStatus, Disposition};

use super::originator::CallOriginator;
use super::registry::ActiveCallRegistry;
use super::types::{ActiveCall, CallId};

/// Runs the per-event-type state machine against the registry and the
/// durable store.
pub struct EventCorrelator {
    config: Arc<CallEngineConfig>,
    registry: Arc<ActiveCallRegistry>,
    store: Arc<dyn CallRecordStore>,
    contacts: Arc<dyn ContactDirectory>,
    notifier: Arc<dyn CompletionNotifier>,
    /// Lets user events that arrive before the PBX call id is known be
    /// attributed through the pending-origination table.
    originator: Option<Arc<CallOriginator>>,
    events_processed: AtomicU64,
    total_completed: AtomicU64,
}

impl EventCorrelator {
    pub fn new(
        config: Arc<CallEngineConfig>,
        registry: Arc<ActiveCallRegistry>,
        store: Arc<dyn CallRecordStore>,
        contacts: Arc<dyn ContactDirectory>,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            contacts,
            notifier,
            originator: None,
            events_processed: AtomicU64::new(0),
            total_completed: AtomicU64::new(0),
        }
    }

    pub fn with_originator(mut self, originator: Arc<CallOriginator>) -> Self {
        self.originator = Some(originator);
        self
    }

    /// Process one inbound event. Never fails: handler errors are logged
    /// and swallowed so the event stream keeps flowing.
    pub async fn handle_event(&self, event: &AmiEvent) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        let result = match event {
            AmiEvent::Newchannel { unique_id, channel, caller_id_num, context, .. } => {
                self.on_newchannel(unique_id, channel, caller_id_num.as_deref(), context.as_deref(), event)
                    .await
            }
            AmiEvent::Newstate { unique_id, channel_state, .. } => {
                self.on_newstate(unique_id, *channel_state, event).await
            }
            AmiEvent::DialEnd { unique_id, dest_channel, dial_status, .. } => {
                self.on_dial_end(unique_id, dest_channel.as_deref(), dial_status, event)
                    .await
            }
            AmiEvent::Bridge { bridge_state, unique_id1, unique_id2, .. } => {
                self.on_bridge(
                    bridge_state.as_deref(),
                    unique_id1.as_deref(),
                    unique_id2.as_deref(),
                    event,
                )
                .await
            }
            AmiEvent::UserEvent { user_event, unique_id, headers } => {
                self.on_user_event(user_event, unique_id.as_deref(), headers, event)
                    .await
            }
            AmiEvent::Hangup { unique_id, channel, caller_id_num, cause, .. } => {
                self.on_hangup(
                    unique_id,
                    channel.as_deref(),
                    caller_id_num.as_deref(),
                    *cause,
                    event,
                )
                .await
            }
            // OriginateResponse is routed to the originator by the event
            // loop; acks and unrecognized events carry nothing for us.
            AmiEvent::OriginateResponse { .. } | AmiEvent::Response(_) => Ok(()),
            AmiEvent::Unknown { event: name, .. } => {
                debug!("Ignoring event type: {}", name);
                Ok(())
            }
        };
        if let Err(e) = result {
            error!("Error handling {} event: {}", event.name(), e);
        }
    }

    async fn on_newchannel(
        &self,
        unique_id: &str,
        channel: &str,
        caller_id_num: Option<&str>,
        context: Option<&str>,
        event: &AmiEvent,
    ) -> Result<()> {
        // Only our own dialplan context; everything else on this PBX is
        // someone else's traffic.
        if context != Some(self.config.correlation.dialplan_context.as_str()) {
            debug!(
                "Ignoring channel {} in foreign context {:?}",
                channel, context
            );
            return Ok(());
        }

        info!("📞 Tracking new channel {} (call {})", channel, unique_id);
        self.registry.insert(ActiveCall::new(
            CallId(unique_id.to_string()),
            channel,
            caller_id_num.map(str::to_string),
        ));

        // The durable record was created before the PBX assigned a call
        // id; attach it now so later lookups hit on the first try.
        if let Some(caller) = caller_id_num {
            let caller = to_e164(caller, &self.config.origination.default_country_code);
            if let Some(record) = self
                .store
                .find_by_caller_within(&caller, self.config.correlation.attach_window)
                .await?
            {
                if record.pbx_call_id.is_none() {
                    debug!("Attaching call id {} to record {}", unique_id, record.id);
                    self.store
                        .update(
                            &record.id,
                            CallRecordUpdate::new()
                                .pbx_call_id(unique_id)
                                .audit(event.name(), event.to_audit_payload()),
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn on_newstate(
        &self,
        unique_id: &str,
        channel_state: Option<ChannelState>,
        event: &AmiEvent,
    ) -> Result<()> {
        let Some(state) = channel_state else {
            return Ok(());
        };

        if !state.is_up() {
            self.registry
                .with_call_mut(unique_id, |call| call.channel_state = Some(state));
            return Ok(());
        }

        let newly_answered = self.registry.with_call_mut(unique_id, |call| {
            call.channel_state = Some(state);
            call.mark_answered()
        });

        if newly_answered == Some(true) {
            info!("✅ Call {} answered", unique_id);
            if let Some(record) = self.store.find_by_call_id(unique_id).await? {
                let mut update =
                    CallRecordUpdate::new().audit(event.name(), event.to_audit_payload());
                // ANSWERED never overwrites a terminal status; a late
                // Newstate after the hangup resolved changes nothing.
                if !record.status.is_terminal() {
                    update = update.status(CallStatus::Answered);
                }
                self.store.update(&record.id, update).await?;
            }
            // Contact/lead status is intentionally NOT advanced here;
            // only a successful transfer or an inbound reply does that.
        }
        Ok(())
    }

    async fn on_dial_end(
        &self,
        unique_id: &str,
        dest_channel: Option<&str>,
        dial_status: &DialStatus,
        event: &AmiEvent,
    ) -> Result<()> {
        self.registry.with_call_mut(unique_id, |call| {
            call.dial_status = Some(dial_status.clone());
            call.dest_channel = dest_channel.map(str::to_string);
            if *dial_status == DialStatus::Answer {
                call.mark_answered();
            }
        });

        let outcome = match dial_status {
            DialStatus::Answer => None,
            DialStatus::Busy => Some((Disposition::Busy, CallStatus::Failed)),
            DialStatus::NoAnswer => Some((Disposition::NoAnswer, CallStatus::NoAnswer)),
            DialStatus::Cancel => Some((Disposition::Cancelled, CallStatus::Failed)),
            DialStatus::Congestion | DialStatus::ChanUnavail | DialStatus::Other(_) => {
                Some((Disposition::Failed, CallStatus::Failed))
            }
        };

        if let Some(record) = self.store.find_by_call_id(unique_id).await? {
            let mut update = CallRecordUpdate::new().audit(event.name(), event.to_audit_payload());
            if let Some((disposition, status)) = outcome {
                debug!(
                    "Dial result {} for call {} → {}/{}",
                    dial_status,
                    unique_id,
                    disposition.as_str(),
                    status.as_str()
                );
                update = update.disposition(disposition).status(status);
            }
            self.store.update(&record.id, update).await?;
        }
        Ok(())
    }

    async fn on_bridge(
        &self,
        bridge_state: Option<&str>,
        unique_id1: Option<&str>,
        unique_id2: Option<&str>,
        event: &AmiEvent,
    ) -> Result<()> {
        let state = bridge_state.unwrap_or("Link").to_string();
        let now = Utc::now();

        for unique_id in [unique_id1, unique_id2].into_iter().flatten() {
            let tracked = self
                .registry
                .with_call_mut(unique_id, |call| {
                    call.bridge_state = Some(state.clone());
                    call.bridge_time = Some(now);
                })
                .is_some();
            // Informational only: audit the bridge, never touch
            // status or disposition.
            if tracked {
                if let Some(record) = self.store.find_by_call_id(unique_id).await? {
                    self.store
                        .update(
                            &record.id,
                            CallRecordUpdate::new().audit(event.name(), event.to_audit_payload()),
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn on_user_event(
        &self,
        user_event: &str,
        unique_id: Option<&str>,
        headers: &HashMap<String, String>,
        event: &AmiEvent,
    ) -> Result<()> {
        let record = self.resolve_for_user_event(unique_id, headers).await?;

        match user_event {
            "CallStatus" => {
                let Some(status_text) = header(headers, "Status") else {
                    debug!("CallStatus user event without a Status header");
                    return Ok(());
                };
                let Some(status) = call_status_from_text(status_text) else {
                    warn!("CallStatus user event with unknown status '{}'", status_text);
                    return Ok(());
                };
                if let Some(record) = record {
                    let mut update =
                        CallRecordUpdate::new().audit(event.name(), event.to_audit_payload());
                    if !record.status.is_terminal() || status.is_terminal() {
                        update = update.status(status);
                    }
                    self.store.update(&record.id, update).await?;
                }
            }
            "TransferConnected" => {
                self.on_transfer_success(unique_id, headers, record, event).await?;
            }
            "TransferResult" => {
                // The status field's casing is not guaranteed; "answer"
                // in any case means the transfer succeeded.
                let status = header(headers, "Status").unwrap_or("");
                if status.eq_ignore_ascii_case("answer") {
                    self.on_transfer_success(unique_id, headers, record, event).await?;
                } else {
                    self.on_transfer_failure(unique_id, status, record, event).await?;
                }
            }
            "TransferFailed" => {
                self.on_transfer_failure(unique_id, "FAILED", record, event).await?;
            }
            "TransferBusy" => {
                self.on_transfer_failure(unique_id, "BUSY", record, event).await?;
            }
            "TransferNoAnswer" => {
                self.on_transfer_failure(unique_id, "NOANSWER", record, event).await?;
            }
            other => {
                debug!("Unhandled user event sub-type: {}", other);
            }
        }
        Ok(())
    }

    async fn on_transfer_success(
        &self,
        unique_id: Option<&str>,
        headers: &HashMap<String, String>,
        record: Option<CallRecord>,
        event: &AmiEvent,
    ) -> Result<()> {
        let billsec = header(headers, "Billsec").and_then(|raw| raw.trim().parse::<i64>().ok());

        if let Some(unique_id) = unique_id {
            self.registry.with_call_mut(unique_id, |call| {
                call.transfer_status = Some("CONNECTED".to_string());
                if billsec.is_some() {
                    call.transfer_billsec = billsec;
                }
            });
        }

        let Some(record) = record else {
            debug!("Transfer success for an unattributable call; dropping");
            return Ok(());
        };

        info!("🔄 Transfer connected for record {} ({})", record.id, record.to_number);
        self.store
            .update(
                &record.id,
                CallRecordUpdate::new()
                    .audit(event.name(), event.to_audit_payload())
                    .merge_metadata(json!({
                        "transferStatus": "CONNECTED",
                        "transferBillsec": billsec,
                    })),
            )
            .await?;

        // The one place contact status advances: a human actually got
        // connected. Settled contacts are never downgraded.
        match self
            .contacts
            .find_by_number(&record.to_number, &record.tenant_id)
            .await?
        {
            Some(contact) if !contact.status.is_settled() => {
                info!("👤 Marking contact {} as contacted", contact.id);
                self.contacts.mark_contacted(&contact.id).await?;
            }
            Some(contact) => {
                debug!("Contact {} already settled ({:?})", contact.id, contact.status);
            }
            None => {
                debug!(
                    "No contact for {} in tenant {}",
                    record.to_number, record.tenant_id
                );
            }
        }
        Ok(())
    }

    async fn on_transfer_failure(
        &self,
        unique_id: Option<&str>,
        status: &str,
        record: Option<CallRecord>,
        event: &AmiEvent,
    ) -> Result<()> {
        let status = if status.is_empty() { "FAILED" } else { status };
        if let Some(unique_id) = unique_id {
            self.registry.with_call_mut(unique_id, |call| {
                call.transfer_status = Some(status.to_ascii_uppercase());
            });
        }
        if let Some(record) = record {
            self.store
                .update(
                    &record.id,
                    CallRecordUpdate::new()
                        .audit(event.name(), event.to_audit_payload())
                        .merge_metadata(json!({ "transferStatus": status.to_ascii_uppercase() })),
                )
                .await?;
        }
        Ok(())
    }

    /// Resolve the durable record for a user event: call id first, then
    /// the correlation id through the pending-origination table.
    async fn resolve_for_user_event(
        &self,
        unique_id: Option<&str>,
        headers: &HashMap<String, String>,
    ) -> Result<Option<CallRecord>> {
        if let Some(unique_id) = unique_id {
            if let Some(record) = self.store.find_by_call_id(unique_id).await? {
                return Ok(Some(record));
            }
        }
        let correlation = header(headers, "RL_CORRELATION_ID")
            .or_else(|| header(headers, "CorrelationId"));
        if let (Some(correlation), Some(originator)) = (correlation, &self.originator) {
            if let Some((_, to_number, _)) = originator.find_by_correlation(correlation) {
                return self
                    .store
                    .find_by_destination_within(&to_number, self.config.correlation.fallback_window)
                    .await;
            }
        }
        Ok(None)
    }

    async fn on_hangup(
        &self,
        unique_id: &str,
        channel: Option<&str>,
        caller_id_num: Option<&str>,
        cause: HangupCause,
        event: &AmiEvent,
    ) -> Result<()> {
        let active = self.registry.remove(unique_id);

        // Fallback chain: record by call id, then by destination number,
        // then by caller number; the channel-created event for this call
        // may have been filtered, delayed, or never matched.
        let mut record = self.store.find_by_call_id(unique_id).await?;
        if record.is_none() {
            if let Some(destination) = self.destination_candidate(&active, channel) {
                record = self
                    .store
                    .find_by_destination_within(&destination, self.config.correlation.fallback_window)
                    .await?;
                if record.is_some() {
                    debug!("Hangup {} attributed via destination {}", unique_id, destination);
                }
            }
        }
        if record.is_none() {
            if let Some(caller) = caller_id_num.or(active.as_ref().and_then(|c| c.caller_number.as_deref())) {
                let caller = to_e164(caller, &self.config.origination.default_country_code);
                record = self
                    .store
                    .find_by_caller_within(&caller, self.config.correlation.fallback_window)
                    .await?;
                if record.is_some() {
                    debug!("Hangup {} attributed via caller {}", unique_id, caller);
                }
            }
        }

        let Some(record) = record else {
            // Nothing to retry against; by definition unattributable.
            debug!(
                "Unattributable hangup for call {} (cause {}); dropping",
                unique_id, cause
            );
            return Ok(());
        };

        let started = active
            .as_ref()
            .map(|call| call.created_at)
            .unwrap_or(record.created_at);
        let duration_seconds = (Utc::now() - started).num_seconds().max(0);
        let threshold = self.config.correlation.answered_duration_threshold.as_secs() as i64;
        let answered = was_answered(active.as_ref(), &record, cause, duration_seconds, threshold);

        let (disposition, status) = if answered {
            (Disposition::Answered, CallStatus::Completed)
        } else {
            (Disposition::NoAnswer, CallStatus::NoAnswer)
        };

        info!(
            "🛑 Call {} ended: cause={} duration={}s → {}/{}",
            unique_id,
            cause,
            duration_seconds,
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
                    .audit(event.name(), event.to_audit_payload()),
            )
            .await?;
        self.total_completed.fetch_add(1, Ordering::Relaxed);

        // Exactly once, best-effort: a notification failure is logged and
        // must never affect the hangup processing that already happened.
        if let Err(e) = self
            .notifier
            .notify_call_completed(unique_id, status, disposition, &record.to_number)
            .await
        {
            warn!("Completion notification failed for call {}: {}", unique_id, e);
        }
        Ok(())
    }

    /// Destination number for the hangup fallback, recovered from the
    /// tracked state or parsed out of the channel name.
    fn destination_candidate(&self, active: &Option<ActiveCall>, channel: Option<&str>) -> Option<String> {
        if let Some(call) = active {
            if let Some(number) = number_from_channel(&call.channel) {
                return Some(to_e164(&number, &self.config.origination.default_country_code));
            }
        }
        channel
            .and_then(number_from_channel)
            .map(|number| to_e164(&number, &self.config.origination.default_country_code))
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }

    pub fn total_completed(&self) -> u64 {
        self.total_completed.load(Ordering::Relaxed)
    }
}

/// Case-insensitive header lookup; user-event header casing varies by
/// dialplan author.
fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn call_status_from_text(text: &str) -> Option<CallStatus> {
    match text.trim().to_ascii_lowercase().as_str() {
        "initiated" => Some(CallStatus::Initiated),
        "connected" => Some(CallStatus::Connected),
        "answered" => Some(CallStatus::Answered),
        "completed" => Some(CallStatus::Completed),
        "failed" => Some(CallStatus::Failed),
        "noanswer" | "no_answer" => Some(CallStatus::NoAnswer),
        _ => None,
    }
}

/// The dialed number embedded in a channel name, e.g.
/// `PJSIP/+14045551234@trunk-east-00000042` → `+14045551234`.
fn number_from_channel(channel: &str) -> Option<String> {
    let rest = channel.split_once('/')?.1;
    let candidate: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    let digits = candidate.chars().filter(|c| c.is_ascii_digit()).count();
    (digits >= 7).then_some(candidate)
}

/// The answered-call heuristic, preserved exactly as the product relies
/// on it: a call counts as answered if it was explicitly flagged answered
/// at any point, OR it hung up with a benign cause (normal clearing or
/// unknown) after a nonzero duration, OR an answer timestamp was ever
/// recorded, OR it simply lasted longer than the threshold. Approximate
/// by design; do not "correct" it.
pub fn was_answered(
    active: Option<&ActiveCall>,
    record: &CallRecord,
    cause: HangupCause,
    duration_seconds: i64,
    threshold_seconds: i64,
) -> bool {
    let flagged = active
        .map(|call| call.answered)
        .unwrap_or(record.status == CallStatus::Answered);
    let answer_seen = active.map(|call| call.answer_time.is_some()).unwrap_or(false);

    flagged
        || (cause.is_benign() && duration_seconds > 0)
        || answer_seen
        || duration_seconds > threshold_seconds
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CallRecord {
        CallRecord::new("tenant-1", "+14045550000", "+14045551234")
    }

    fn active(answered: bool) -> ActiveCall {
        let mut call = ActiveCall::new(CallId::from("1.1"), "PJSIP/+14045551234@trunk-0001", None);
        if answered {
            call.mark_answered();
        }
        call
    }

    #[test]
    fn long_cause_16_call_counts_as_answered_without_answer_event() {
        // Cause 16, 45 seconds, no answer event ever seen.
        let call = active(false);
        assert!(was_answered(
            Some(&call),
            &record(),
            HangupCause::NORMAL_CLEARING,
            45,
            3
        ));
    }

    #[test]
    fn zero_duration_unanswered_call_is_not_answered() {
        let call = active(false);
        assert!(!was_answered(
            Some(&call),
            &record(),
            HangupCause::NORMAL_CLEARING,
            0,
            3
        ));
    }

    #[test]
    fn explicit_answer_flag_wins_regardless_of_cause() {
        let call = active(true);
        assert!(was_answered(Some(&call), &record(), HangupCause(21), 1, 3));
    }

    #[test]
    fn hostile_cause_needs_duration_above_threshold() {
        let call = active(false);
        assert!(!was_answered(Some(&call), &record(), HangupCause::USER_BUSY, 2, 3));
        assert!(was_answered(Some(&call), &record(), HangupCause::USER_BUSY, 4, 3));
    }

    #[test]
    fn record_status_answered_substitutes_for_missing_active_call() {
        let mut rec = record();
        rec.status = CallStatus::Answered;
        assert!(was_answered(None, &rec, HangupCause(21), 0, 3));
    }

    #[test]
    fn channel_number_extraction() {
        assert_eq!(
            number_from_channel("PJSIP/+14045551234@trunk-east-00000042").as_deref(),
            Some("+14045551234")
        );
        assert_eq!(
            number_from_channel("PJSIP/14045551234-00000001").as_deref(),
            Some("14045551234")
        );
        assert_eq!(number_from_channel("PJSIP/agent-00000002"), None);
        assert_eq!(number_from_channel("garbage"), None);
    }

    #[test]
    fn call_status_text_mapping() {
        assert_eq!(call_status_from_text("Connected"), Some(CallStatus::Connected));
        assert_eq!(call_status_from_text("NO_ANSWER"), Some(CallStatus::NoAnswer));
        assert_eq!(call_status_from_text("sideways"), None);
    }
}
