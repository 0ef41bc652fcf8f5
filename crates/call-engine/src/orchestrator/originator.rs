//! Call origination with request/response correlation
//!
//! Originations are asynchronous twice over: the manager acks the action
//! immediately, and the real outcome arrives later as an
//! `OriginateResponse` event carrying our request id. The pending table
//! here joins the two: registered before the request is sent, resolved
//! exactly once by the response event, the 35-second deadline, or the
//! periodic sweep.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use ringline_ami_client::{ConnectionManager, ManagerClient};
use ringline_ami_core::action::{Action, ActionId, OriginateAction};

use crate::config::CallEngineConfig;
use crate::error::{CallEngineError, OriginateFailure, Result};
use crate::numbers::{to_e164, to_transfer_format};

use super::types::{
    CallId, CompletionResult, CorrelationId, OriginateOutcome, OriginateParams,
    PendingOrigination, RequestId,
};

/// Issues origination requests and correlates their eventual responses.
pub struct CallOriginator {
    config: Arc<CallEngineConfig>,
    manager: Arc<ConnectionManager>,
    client: ManagerClient,
    /// At most one entry per request id, ever.
    pending: Arc<DashMap<String, PendingOrigination>>,
    total_originated: AtomicU64,
}

impl CallOriginator {
    pub fn new(config: Arc<CallEngineConfig>, manager: Arc<ConnectionManager>) -> Self {
        let client = manager.client();
        Self {
            config,
            manager,
            client,
            pending: Arc::new(DashMap::new()),
            total_originated: AtomicU64::new(0),
        }
    }

    /// Originate an outbound call and await its outcome.
    ///
    /// Precondition: if the session is not live, one reconnect is
    /// attempted; still down means an immediate
    /// [`CallEngineError::ConnectionUnavailable`]. Requests are never
    /// queued against a dead session.
    ///
    /// Exactly one of success or failure fires, within the configured
    /// response deadline (35 seconds by default).
    pub async fn originate(&self, params: OriginateParams) -> Result<OriginateOutcome> {
        if !self.client.is_live() && !self.manager.ensure_connected().await {
            return Err(CallEngineError::connection_unavailable(
                "manager session is down and reconnect failed",
            ));
        }

        let origination = &self.config.origination;
        let country_code = origination.default_country_code.as_str();

        // The two normalization forms are a channel-driver requirement:
        // routed numbers take the plus form, the transfer variable the
        // bare country-code form.
        let to_number = to_e164(&params.to_number, country_code);
        let from_number = to_e164(&params.from_number, country_code);
        let transfer_number = params
            .transfer_number
            .as_deref()
            .map(|raw| to_transfer_format(raw, country_code));

        let trunk = params
            .trunk
            .clone()
            .unwrap_or_else(|| origination.default_trunk.clone());
        let request_id = generate_request_id();
        let correlation_id = params
            .correlation_id
            .clone()
            .unwrap_or_else(|| CorrelationId(request_id.0.clone()));

        let mut variables: Vec<(String, String)> = vec![
            ("RL_TO_NUMBER".into(), to_number.clone()),
            ("RL_FROM_NUMBER".into(), from_number.clone()),
            ("RL_TRUNK".into(), trunk.clone()),
            ("RL_CORRELATION_ID".into(), correlation_id.0.clone()),
        ];
        if let Some(transfer) = &transfer_number {
            variables.push(("RL_TRANSFER_NUMBER".into(), transfer.clone()));
        }
        if let Some(ivr) = &params.ivr_audio {
            variables.push(("RL_IVR_AUDIO".into(), ivr.clone()));
        }
        if let Some(voicemail) = &params.voicemail_audio {
            variables.push(("RL_VOICEMAIL_AUDIO".into(), voicemail.clone()));
        }
        variables.push((
            "RL_AMD".into(),
            if params.amd_enabled { "1" } else { "0" }.into(),
        ));

        let action = Action::Originate(OriginateAction {
            channel: format!("PJSIP/{}@{}", to_number, trunk),
            context: params
                .context
                .clone()
                .unwrap_or_else(|| origination.context.clone()),
            exten: params
                .extension
                .clone()
                .unwrap_or_else(|| origination.extension.clone()),
            priority: origination.priority,
            caller_id: Some(from_number.clone()),
            timeout_ms: Some(origination.ring_timeout.as_millis() as u64),
            async_originate: true,
            variables,
        });

        let (tx, rx) = oneshot::channel();
        // Registered before the send so the response event cannot race us.
        self.pending.insert(
            request_id.0.clone(),
            PendingOrigination {
                request_id: request_id.clone(),
                correlation_id: correlation_id.clone(),
                to_number: to_number.clone(),
                from_number,
                transfer_number,
                trunk,
                created_at: Utc::now(),
                completion: tx,
            },
        );
        self.total_originated.fetch_add(1, Ordering::Relaxed);

        info!(
            "📞 Originating call {} → {} (request {})",
            params.from_number, to_number, request_id
        );

        let action_id = ActionId(request_id.0.clone());
        match self.client.send_action(&action, &action_id).await {
            Ok(ack) if !ack.is_success() => {
                // The manager refused the action outright.
                self.fail(
                    request_id.as_str(),
                    OriginateFailure::Rejected {
                        response: ack.response.clone(),
                        reason: None,
                        message: ack.message.clone(),
                        channel: None,
                    },
                );
            }
            Ok(_) => {}
            Err(ringline_ami_client::AmiClientError::ActionTimeout { .. }) => {
                // Ack lost but the request may still be in flight; the
                // response deadline below decides.
                warn!("Origination ack timed out for request {}", request_id);
            }
            Err(e) => {
                self.fail(request_id.as_str(), OriginateFailure::SendFailed(e.to_string()));
            }
        }

        // Independent deadline: whatever else happens, the handle fires
        // within the response timeout.
        let pending = self.pending.clone();
        let deadline = self.config.origination.response_timeout;
        let deadline_request = request_id.0.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if let Some((_, entry)) = pending.remove(&deadline_request) {
                debug!("Origination request {} timed out", deadline_request);
                let _ = entry
                    .completion
                    .send(Err(OriginateFailure::Timeout(deadline.as_secs())));
            }
        });

        match rx.await {
            Ok(Ok(call_id)) => {
                info!("✅ Origination {} accepted as call {}", request_id, call_id);
                Ok(OriginateOutcome { request_id, correlation_id, call_id })
            }
            Ok(Err(failure)) => Err(CallEngineError::Origination(failure)),
            Err(_) => Err(CallEngineError::internal(
                "origination completion handle dropped",
            )),
        }
    }

    /// Route an `OriginateResponse` event to its pending request.
    pub fn handle_originate_response(
        &self,
        action_id: Option<&ActionId>,
        response: &str,
        reason: Option<&str>,
        unique_id: Option<&str>,
        channel: Option<&str>,
    ) {
        let Some(action_id) = action_id else {
            debug!("OriginateResponse without ActionID; cannot correlate");
            return;
        };
        let Some((_, entry)) = self.pending.remove(action_id.as_str()) else {
            debug!(
                "OriginateResponse for unknown request {} (already resolved?)",
                action_id
            );
            return;
        };

        let result: CompletionResult = if response.eq_ignore_ascii_case("success") {
            match unique_id {
                Some(unique_id) => Ok(CallId(unique_id.to_string())),
                None => Err(OriginateFailure::Rejected {
                    response: response.to_string(),
                    reason: reason.map(str::to_string),
                    message: Some("success response without a call id".to_string()),
                    channel: channel.map(str::to_string),
                }),
            }
        } else {
            Err(OriginateFailure::Rejected {
                response: response.to_string(),
                reason: reason.map(str::to_string),
                message: None,
                channel: channel.map(str::to_string),
            })
        };
        let _ = entry.completion.send(result);
    }

    /// Periodic sweep: evict entries past the max age, then trim the
    /// table to its most recent entries if it grew unbounded.
    pub fn sweep(&self) {
        let max_age = chrono::Duration::from_std(self.config.origination.pending_max_age)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let cutoff = Utc::now() - max_age;

        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().created_at < cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        for request_id in expired {
            self.fail(
                &request_id,
                OriginateFailure::Timeout(self.config.origination.pending_max_age.as_secs()),
            );
        }

        let cap = self.config.origination.pending_max_entries;
        if self.pending.len() > cap {
            let mut entries: Vec<(String, chrono::DateTime<Utc>)> = self
                .pending
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().created_at))
                .collect();
            // Oldest first; everything beyond the newest `cap` goes.
            entries.sort_by_key(|(_, created_at)| *created_at);
            let excess = entries.len().saturating_sub(cap);
            for (request_id, _) in entries.into_iter().take(excess) {
                warn!("Pending origination table over capacity; evicting {}", request_id);
                self.fail(
                    &request_id,
                    OriginateFailure::Timeout(self.config.origination.pending_max_age.as_secs()),
                );
            }
        }
    }

    /// Spawn the 5-second sweep loop.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let originator = self.clone();
        let interval = self.config.origination.pending_sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                originator.sweep();
            }
        })
    }

    fn fail(&self, request_id: &str, failure: OriginateFailure) {
        if let Some((_, entry)) = self.pending.remove(request_id) {
            let _ = entry.completion.send(Err(failure));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn total_originated(&self) -> u64 {
        self.total_originated.load(Ordering::Relaxed)
    }

    /// Pending entry whose correlation id matches, if any. Used by the
    /// correlator to attribute user events that arrive before the PBX
    /// call id is known.
    pub fn find_by_correlation(&self, correlation_id: &str) -> Option<(RequestId, String, String)> {
        self.pending.iter().find_map(|entry| {
            let value = entry.value();
            (value.correlation_id.as_str() == correlation_id).then(|| {
                (
                    value.request_id.clone(),
                    value.to_number.clone(),
                    value.from_number.clone(),
                )
            })
        })
    }
}

/// Time-based id with a random suffix: unique within the process and
/// sortable by creation time when read back from logs.
fn generate_request_id() -> RequestId {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    RequestId(format!("{}-{}", Utc::now().timestamp_millis(), suffix))
}
