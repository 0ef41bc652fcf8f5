//! Shared type definitions for the orchestration layer

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use ringline_ami_core::channel::{ChannelState, DialStatus};

use crate::error::OriginateFailure;

/// The PBX's own identifier for a call, assigned once the channel exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(pub String);

impl CallId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Locally generated identifier for one origination request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application identifier passed at call setup so early and late events
/// can be joined to the originating request before the call id is known.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inputs to one call origination.
#[derive(Debug, Clone, Default)]
pub struct OriginateParams {
    /// Destination number, any common format; normalized before transmission.
    pub to_number: String,
    /// Caller-id number presented to the callee.
    pub from_number: String,
    /// Trunk to route over; falls back to the configured default.
    pub trunk: Option<String>,
    /// Number a successful IVR interaction transfers the callee to.
    pub transfer_number: Option<String>,
    /// Dialplan context override.
    pub context: Option<String>,
    /// Dialplan extension override.
    pub extension: Option<String>,
    /// Caller-supplied correlation id; defaults to the request id.
    pub correlation_id: Option<CorrelationId>,
    /// IVR audio file reference played on answer.
    pub ivr_audio: Option<String>,
    /// Voicemail audio file reference for machine-detected answers.
    pub voicemail_audio: Option<String>,
    /// Answering-machine detection toggle.
    pub amd_enabled: bool,
}

/// Successful origination outcome: the PBX accepted and assigned a call id.
#[derive(Debug, Clone)]
pub struct OriginateOutcome {
    pub request_id: RequestId,
    pub correlation_id: CorrelationId,
    pub call_id: CallId,
}

/// Completion handle payload: either the assigned call id or a structured
/// failure.
pub type CompletionResult = std::result::Result<CallId, OriginateFailure>;

/// One outstanding origination request awaiting its response event.
///
/// Registered before the request is sent; removed exactly once, by the
/// matching response event, the 35-second deadline, or the periodic sweep.
pub struct PendingOrigination {
    pub request_id: RequestId,
    pub correlation_id: CorrelationId,
    pub to_number: String,
    pub from_number: String,
    pub transfer_number: Option<String>,
    pub trunk: String,
    pub created_at: DateTime<Utc>,
    /// Success/failure callback pair.
    pub completion: oneshot::Sender<CompletionResult>,
}

impl fmt::Debug for PendingOrigination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOrigination")
            .field("request_id", &self.request_id)
            .field("correlation_id", &self.correlation_id)
            .field("to_number", &self.to_number)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// In-memory state of one tracked call.
///
/// Created only by a channel-creation event in the designated dialplan
/// context; mutated by every subsequent event for the same call id;
/// removed on hangup or by the reaper.
#[derive(Debug, Clone)]
pub struct ActiveCall {
    pub call_id: CallId,
    pub channel: String,
    pub caller_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub channel_state: Option<ChannelState>,
    pub dial_status: Option<DialStatus>,
    pub dest_channel: Option<String>,
    pub answer_time: Option<DateTime<Utc>>,
    /// Once true, never reverts.
    pub answered: bool,
    pub bridge_state: Option<String>,
    pub bridge_time: Option<DateTime<Utc>>,
    pub transfer_status: Option<String>,
    pub transfer_billsec: Option<i64>,
}

impl ActiveCall {
    pub fn new(call_id: CallId, channel: impl Into<String>, caller_number: Option<String>) -> Self {
        Self {
            call_id,
            channel: channel.into(),
            caller_number,
            created_at: Utc::now(),
            channel_state: None,
            dial_status: None,
            dest_channel: None,
            answer_time: None,
            answered: false,
            bridge_state: None,
            bridge_time: None,
            transfer_status: None,
            transfer_billsec: None,
        }
    }

    /// Flag the call answered. Idempotent; the flag never reverts and the
    /// first answer timestamp wins.
    pub fn mark_answered(&mut self) -> bool {
        if self.answered {
            return false;
        }
        self.answered = true;
        if self.answer_time.is_none() {
            self.answer_time = Some(Utc::now());
        }
        true
    }

    /// Seconds since this call was first tracked.
    pub fn age_seconds(&self) -> i64 {
        (Utc::now() - self.created_at).num_seconds()
    }
}

/// Snapshot of engine state for monitoring surfaces.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Calls currently tracked in memory
    pub active_calls: usize,
    /// Originations awaiting their response event
    pub pending_originations: usize,
    /// Whether the manager session is live
    pub session_live: bool,
    /// Originations submitted since startup
    pub total_originated: u64,
    /// Terminal hangups resolved since startup
    pub total_completed: u64,
}
