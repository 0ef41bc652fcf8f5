//! Integration tests for the event-correlation state machine
//!
//! These drive the correlator directly with typed events against an
//! isolated registry and in-memory store per test, the way the engine's
//! event loop would.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio_test::assert_ok;

use ringline_ami_core::channel::{ChannelState, DialStatus, HangupCause};
use ringline_ami_core::event::AmiEvent;
use ringline_call_engine::orchestrator::correlator::EventCorrelator;
use ringline_call_engine::orchestrator::reaper::StaleStateReaper;
use ringline_call_engine::orchestrator::registry::ActiveCallRegistry;
use ringline_call_engine::orchestrator::types::{ActiveCall, CallId};
use ringline_call_engine::prelude::*;

const CONTEXT: &str = "ringline-outbound";

/// Notifier that records every completion it is told about.
#[derive(Default)]
struct RecordingNotifier {
    completions: Mutex<Vec<(String, CallStatus, Disposition, String)>>,
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn notify_call_completed(
        &self,
        call_id: &str,
        status: CallStatus,
        disposition: Disposition,
        destination_number: &str,
    ) -> anyhow::Result<()> {
        self.completions.lock().push((
            call_id.to_string(),
            status,
            disposition,
            destination_number.to_string(),
        ));
        Ok(())
    }
}

/// Directory holding one contact, recording advancement calls.
struct SingleContactDirectory {
    contact: Contact,
    contacted: Mutex<Vec<String>>,
}

impl SingleContactDirectory {
    fn new(number: &str, tenant_id: &str, status: ContactStatus) -> Self {
        Self {
            contact: Contact {
                id: "contact-1".to_string(),
                tenant_id: tenant_id.to_string(),
                number: number.to_string(),
                status,
            },
            contacted: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ContactDirectory for SingleContactDirectory {
    async fn find_by_number(&self, number: &str, tenant_id: &str) -> Result<Option<Contact>> {
        Ok((self.contact.number == number && self.contact.tenant_id == tenant_id)
            .then(|| self.contact.clone()))
    }

    async fn mark_contacted(&self, contact_id: &str) -> Result<()> {
        self.contacted.lock().push(contact_id.to_string());
        Ok(())
    }
}

struct Harness {
    registry: Arc<ActiveCallRegistry>,
    store: Arc<MemoryCallStore>,
    notifier: Arc<RecordingNotifier>,
    correlator: EventCorrelator,
}

fn harness_with_contacts(contacts: Arc<dyn ContactDirectory>) -> Harness {
    let config = Arc::new(CallEngineConfig::default());
    let registry = Arc::new(ActiveCallRegistry::new());
    let store = Arc::new(MemoryCallStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let correlator = EventCorrelator::new(
        config,
        registry.clone(),
        store.clone(),
        contacts,
        notifier.clone(),
    );
    Harness { registry, store, notifier, correlator }
}

fn harness() -> Harness {
    harness_with_contacts(Arc::new(NullContactDirectory))
}

fn newchannel(unique_id: &str, channel: &str, caller: &str, context: &str) -> AmiEvent {
    AmiEvent::Newchannel {
        unique_id: unique_id.to_string(),
        channel: channel.to_string(),
        caller_id_num: Some(caller.to_string()),
        exten: Some("s".to_string()),
        context: Some(context.to_string()),
        channel_state: Some(ChannelState::from_code(4)),
    }
}

fn newstate_up(unique_id: &str) -> AmiEvent {
    AmiEvent::Newstate {
        unique_id: unique_id.to_string(),
        channel: None,
        channel_state: Some(ChannelState::from_code(6)),
        channel_state_desc: Some("Up".to_string()),
    }
}

fn dial_end(unique_id: &str, status: DialStatus) -> AmiEvent {
    AmiEvent::DialEnd {
        unique_id: unique_id.to_string(),
        dest_unique_id: None,
        dest_channel: Some("PJSIP/transfer-0001".to_string()),
        dial_status: status,
    }
}

fn hangup(unique_id: &str, channel: Option<&str>, cause: u32) -> AmiEvent {
    AmiEvent::Hangup {
        unique_id: unique_id.to_string(),
        channel: channel.map(str::to_string),
        caller_id_num: None,
        cause: HangupCause(cause),
        cause_txt: None,
    }
}

fn user_event(sub_type: &str, unique_id: Option<&str>, pairs: &[(&str, &str)]) -> AmiEvent {
    let headers: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    AmiEvent::UserEvent {
        user_event: sub_type.to_string(),
        unique_id: unique_id.map(str::to_string),
        headers,
    }
}

async fn seeded_record(store: &MemoryCallStore, pbx_call_id: Option<&str>) -> String {
    let mut record = CallRecord::new("tenant-1", "+14045550000", "+14045551234");
    record.pbx_call_id = pbx_call_id.map(str::to_string);
    let id = record.id.clone();
    store.insert(record).await.unwrap();
    id
}

#[tokio::test]
async fn full_lifecycle_resolves_to_completed_answered() {
    let h = harness();
    let record_id = seeded_record(&h.store, None).await;

    h.correlator
        .handle_event(&newchannel("10.1", "PJSIP/+14045551234@trunk-0001", "+14045550000", CONTEXT))
        .await;
    assert!(h.registry.contains("10.1"));
    // The caller-number attach path gave the record its call id.
    assert_eq!(
        h.store.get(&record_id).unwrap().pbx_call_id.as_deref(),
        Some("10.1")
    );

    h.correlator.handle_event(&newstate_up("10.1")).await;
    let record = h.store.get(&record_id).unwrap();
    assert_eq!(record.status, CallStatus::Answered);
    assert!(h.registry.get("10.1").unwrap().answered);

    h.correlator.handle_event(&hangup("10.1", None, 16)).await;
    let record = h.store.get(&record_id).unwrap();
    assert_eq!(record.status, CallStatus::Completed);
    assert_eq!(record.disposition, Some(Disposition::Answered));
    assert!(record.duration_seconds.is_some());
    assert!(!h.registry.contains("10.1"));
    assert_eq!(h.registry.index_sizes(), (0, 0));

    // Exactly one completion notification, carrying the destination.
    let completions = h.notifier.completions.lock();
    assert_eq!(completions.len(), 1);
    let (call_id, status, disposition, destination) = &completions[0];
    assert_eq!(call_id, "10.1");
    assert_eq!(*status, CallStatus::Completed);
    assert_eq!(*disposition, Disposition::Answered);
    assert_eq!(destination, "+14045551234");
}

#[tokio::test]
async fn foreign_context_channels_are_ignored() {
    let h = harness();
    let record_id = seeded_record(&h.store, None).await;

    h.correlator
        .handle_event(&newchannel("11.1", "PJSIP/agent-0001", "+14045550000", "internal-agents"))
        .await;

    assert!(h.registry.is_empty());
    assert!(h.store.get(&record_id).unwrap().pbx_call_id.is_none());
}

#[tokio::test]
async fn unregistered_hangup_falls_back_to_destination_number() {
    let h = harness();
    // Record created two minutes ago, call id never attached (its
    // Newchannel was lost).
    let mut record = CallRecord::new("tenant-1", "+14045550000", "+14045551234");
    record.created_at = Utc::now() - chrono::Duration::minutes(2);
    let record_id = record.id.clone();
    h.store.insert(record).await.unwrap();

    h.correlator
        .handle_event(&hangup("99.9", Some("PJSIP/+14045551234@trunk-0007"), 16))
        .await;

    let record = h.store.get(&record_id).unwrap();
    assert_eq!(record.status, CallStatus::Completed);
    assert_eq!(record.disposition, Some(Disposition::Answered));
    assert_eq!(h.notifier.completions.lock().len(), 1);
}

#[tokio::test]
async fn unattributable_hangup_is_dropped() {
    let h = harness();

    h.correlator
        .handle_event(&hangup("404.1", Some("PJSIP/+19995551234@trunk-0001"), 16))
        .await;

    assert!(h.store.is_empty());
    assert!(h.notifier.completions.lock().is_empty());
}

#[tokio::test]
async fn dial_results_map_to_fixed_disposition_status_pairs() {
    for (dial_status, disposition, status) in [
        (DialStatus::Busy, Disposition::Busy, CallStatus::Failed),
        (DialStatus::NoAnswer, Disposition::NoAnswer, CallStatus::NoAnswer),
        (DialStatus::Cancel, Disposition::Cancelled, CallStatus::Failed),
        (DialStatus::ChanUnavail, Disposition::Failed, CallStatus::Failed),
        (DialStatus::Congestion, Disposition::Failed, CallStatus::Failed),
    ] {
        let h = harness();
        let record_id = seeded_record(&h.store, Some("20.1")).await;

        h.correlator.handle_event(&dial_end("20.1", dial_status.clone())).await;

        let record = h.store.get(&record_id).unwrap();
        assert_eq!(record.disposition, Some(disposition), "for {}", dial_status);
        assert_eq!(record.status, status, "for {}", dial_status);
    }
}

#[tokio::test]
async fn dial_answer_flags_answered_without_touching_status() {
    let h = harness();
    let record_id = seeded_record(&h.store, Some("21.1")).await;
    h.registry.insert(ActiveCall::new(
        CallId::from("21.1"),
        "PJSIP/+14045551234@trunk-0001",
        None,
    ));

    h.correlator.handle_event(&dial_end("21.1", DialStatus::Answer)).await;

    let call = h.registry.get("21.1").unwrap();
    assert!(call.answered);
    assert_eq!(call.dest_channel.as_deref(), Some("PJSIP/transfer-0001"));
    // ANSWERED status comes from Newstate alone.
    assert_eq!(h.store.get(&record_id).unwrap().status, CallStatus::Initiated);
}

#[tokio::test]
async fn bridge_events_are_informational_only() {
    let h = harness();
    let record_id = seeded_record(&h.store, Some("22.1")).await;
    h.registry.insert(ActiveCall::new(
        CallId::from("22.1"),
        "PJSIP/+14045551234@trunk-0001",
        None,
    ));

    h.correlator
        .handle_event(&AmiEvent::Bridge {
            bridge_state: Some("Link".to_string()),
            unique_id1: Some("22.1".to_string()),
            unique_id2: Some("22.2".to_string()),
            channel1: None,
            channel2: None,
        })
        .await;

    let call = h.registry.get("22.1").unwrap();
    assert_eq!(call.bridge_state.as_deref(), Some("Link"));
    assert!(call.bridge_time.is_some());

    let record = h.store.get(&record_id).unwrap();
    assert_eq!(record.status, CallStatus::Initiated);
    assert_eq!(record.disposition, None);
    assert_eq!(record.audit_log.len(), 1);
}

#[tokio::test]
async fn transfer_success_advances_new_contact() {
    let contacts = Arc::new(SingleContactDirectory::new(
        "+14045551234",
        "tenant-1",
        ContactStatus::New,
    ));
    let h = harness_with_contacts(contacts.clone());
    seeded_record(&h.store, Some("30.1")).await;

    h.correlator
        .handle_event(&user_event(
            "TransferResult",
            Some("30.1"),
            &[("Status", "Answer"), ("Billsec", "42")],
        ))
        .await;

    assert_eq!(contacts.contacted.lock().as_slice(), &["contact-1".to_string()]);
}

#[tokio::test]
async fn transfer_result_status_is_case_insensitive() {
    let contacts = Arc::new(SingleContactDirectory::new(
        "+14045551234",
        "tenant-1",
        ContactStatus::New,
    ));
    let h = harness_with_contacts(contacts.clone());
    seeded_record(&h.store, Some("31.1")).await;

    h.correlator
        .handle_event(&user_event("TransferResult", Some("31.1"), &[("Status", "ANSWER")]))
        .await;

    assert_eq!(contacts.contacted.lock().len(), 1);
}

#[tokio::test]
async fn settled_contact_is_never_downgraded() {
    let contacts = Arc::new(SingleContactDirectory::new(
        "+14045551234",
        "tenant-1",
        ContactStatus::Sold,
    ));
    let h = harness_with_contacts(contacts.clone());
    seeded_record(&h.store, Some("32.1")).await;

    h.correlator
        .handle_event(&user_event("TransferConnected", Some("32.1"), &[("Billsec", "10")]))
        .await;

    assert!(contacts.contacted.lock().is_empty());
}

#[tokio::test]
async fn answer_alone_never_advances_a_contact() {
    let contacts = Arc::new(SingleContactDirectory::new(
        "+14045551234",
        "tenant-1",
        ContactStatus::New,
    ));
    let h = harness_with_contacts(contacts.clone());
    seeded_record(&h.store, Some("33.1")).await;
    h.registry.insert(ActiveCall::new(
        CallId::from("33.1"),
        "PJSIP/+14045551234@trunk-0001",
        None,
    ));

    h.correlator.handle_event(&newstate_up("33.1")).await;
    h.correlator.handle_event(&hangup("33.1", None, 16)).await;

    // Answered and completed, but the contact stayed put.
    assert!(contacts.contacted.lock().is_empty());
}

#[tokio::test]
async fn transfer_failure_records_status_without_contact_change() {
    let contacts = Arc::new(SingleContactDirectory::new(
        "+14045551234",
        "tenant-1",
        ContactStatus::New,
    ));
    let h = harness_with_contacts(contacts.clone());
    let record_id = seeded_record(&h.store, Some("34.1")).await;
    h.registry.insert(ActiveCall::new(
        CallId::from("34.1"),
        "PJSIP/+14045551234@trunk-0001",
        None,
    ));

    h.correlator
        .handle_event(&user_event("TransferBusy", Some("34.1"), &[]))
        .await;

    assert_eq!(
        h.registry.get("34.1").unwrap().transfer_status.as_deref(),
        Some("BUSY")
    );
    assert_eq!(
        h.store.get(&record_id).unwrap().metadata["transferStatus"],
        "BUSY"
    );
    assert!(contacts.contacted.lock().is_empty());
}

#[tokio::test]
async fn call_status_user_event_reaches_connected() {
    let h = harness();
    let record_id = seeded_record(&h.store, Some("35.1")).await;

    h.correlator
        .handle_event(&user_event("CallStatus", Some("35.1"), &[("Status", "connected")]))
        .await;

    assert_eq!(h.store.get(&record_id).unwrap().status, CallStatus::Connected);
}

#[tokio::test]
async fn audit_log_stays_bounded_under_event_flood() {
    let h = harness();
    let record_id = seeded_record(&h.store, Some("36.1")).await;

    for _ in 0..120 {
        h.correlator
            .handle_event(&user_event("CallStatus", Some("36.1"), &[("Status", "connected")]))
            .await;
    }

    assert_eq!(h.store.get(&record_id).unwrap().audit_log.len(), 100);
}

#[tokio::test]
async fn hangup_cause_16_long_duration_without_answer_event_is_answered() {
    let h = harness();
    let mut record = CallRecord::new("tenant-1", "+14045550000", "+14045551234");
    record.pbx_call_id = Some("37.1".to_string());
    // Created 45 seconds ago; no answer event was ever seen.
    record.created_at = Utc::now() - chrono::Duration::seconds(45);
    let record_id = record.id.clone();
    h.store.insert(record).await.unwrap();

    h.correlator.handle_event(&hangup("37.1", None, 16)).await;

    let record = h.store.get(&record_id).unwrap();
    assert_eq!(record.disposition, Some(Disposition::Answered));
    assert_eq!(record.status, CallStatus::Completed);
    assert!(record.duration_seconds.unwrap() >= 44);
}

#[tokio::test]
async fn handler_errors_do_not_stop_the_stream() {
    let h = harness();
    // No record anywhere; every event is a miss or a no-op, none may
    // panic or poison the correlator.
    h.correlator.handle_event(&newstate_up("50.1")).await;
    h.correlator.handle_event(&dial_end("50.2", DialStatus::Busy)).await;
    h.correlator
        .handle_event(&user_event("TransferResult", None, &[("Status", "answer")]))
        .await;
    h.correlator.handle_event(&hangup("50.3", None, 0)).await;

    let record_id = seeded_record(&h.store, Some("51.1")).await;
    h.correlator.handle_event(&dial_end("51.1", DialStatus::Busy)).await;
    assert_eq!(h.store.get(&record_id).unwrap().status, CallStatus::Failed);
}

// --- Reaper ---

fn reaper_harness() -> (Arc<ActiveCallRegistry>, Arc<MemoryCallStore>, StaleStateReaper) {
    let config = Arc::new(CallEngineConfig::default());
    let registry = Arc::new(ActiveCallRegistry::new());
    let store = Arc::new(MemoryCallStore::new());
    let reaper = StaleStateReaper::new(config, registry.clone(), store.clone());
    (registry, store, reaper)
}

#[tokio::test]
async fn reaper_evicts_aged_registry_entries() {
    let (registry, _store, reaper) = reaper_harness();
    let mut old = ActiveCall::new(CallId::from("60.1"), "PJSIP/+14045551111@trunk-0001", None);
    old.created_at = Utc::now() - chrono::Duration::minutes(6);
    registry.insert(old);
    registry.insert(ActiveCall::new(
        CallId::from("60.2"),
        "PJSIP/+14045552222@trunk-0002",
        None,
    ));

    tokio_test::assert_ok!(reaper.tick().await);

    assert!(!registry.contains("60.1"));
    assert!(registry.contains("60.2"));
    assert_eq!(registry.index_sizes(), (1, 1));
    assert_eq!(reaper.reaped_calls(), 1);
}

#[tokio::test]
async fn reaper_force_terminates_stuck_connected_record() {
    let (_registry, store, reaper) = reaper_harness();
    let mut record = CallRecord::new("tenant-1", "+14045550000", "+14045551234");
    record.status = CallStatus::Connected;
    record.created_at = Utc::now() - chrono::Duration::minutes(11);
    record.updated_at = record.created_at;
    let record_id = record.id.clone();
    store.insert(record).await.unwrap();

    tokio_test::assert_ok!(reaper.tick().await);

    let record = store.get(&record_id).unwrap();
    // Eleven minutes old: the computed duration clears the threshold.
    assert_eq!(record.status, CallStatus::NoAnswer);
    assert_eq!(record.disposition, Some(Disposition::NoAnswer));
    let entry = record.audit_log.last().unwrap();
    assert_eq!(entry.event, "ForcedCleanup");
    assert_eq!(entry.data["forced"], true);
    assert_eq!(reaper.forced_terminations(), 1);
}

#[tokio::test]
async fn reaper_fails_stuck_record_with_tiny_duration() {
    let (_registry, store, reaper) = reaper_harness();
    let mut record = CallRecord::new("tenant-1", "+14045550000", "+14045551234");
    record.status = CallStatus::Connected;
    // Status write went stale eleven minutes ago, but the record itself
    // claims to have been created just now: duration under threshold.
    record.created_at = Utc::now() - chrono::Duration::seconds(2);
    record.updated_at = Utc::now() - chrono::Duration::minutes(11);
    let record_id = record.id.clone();
    store.insert(record).await.unwrap();

    tokio_test::assert_ok!(reaper.tick().await);

    let record = store.get(&record_id).unwrap();
    assert_eq!(record.status, CallStatus::Failed);
    assert_eq!(record.disposition, Some(Disposition::Failed));
}

#[tokio::test]
async fn reaper_leaves_healthy_records_alone() {
    let (_registry, store, reaper) = reaper_harness();
    let mut fresh = CallRecord::new("tenant-1", "+14045550000", "+14045551234");
    fresh.status = CallStatus::Connected;
    let fresh_id = fresh.id.clone();
    store.insert(fresh).await.unwrap();

    let mut terminal = CallRecord::new("tenant-1", "+14045550000", "+14045555678");
    terminal.status = CallStatus::Completed;
    terminal.created_at = Utc::now() - chrono::Duration::minutes(30);
    terminal.updated_at = terminal.created_at;
    let terminal_id = terminal.id.clone();
    store.insert(terminal).await.unwrap();

    tokio_test::assert_ok!(reaper.tick().await);

    assert_eq!(store.get(&fresh_id).unwrap().status, CallStatus::Connected);
    assert_eq!(store.get(&terminal_id).unwrap().status, CallStatus::Completed);
    assert_eq!(reaper.forced_terminations(), 0);
}
