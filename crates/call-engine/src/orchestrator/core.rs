//! Core call engine
//!
//! [`CallEngine`] wires the pieces together: the supervised manager
//! session, the originator with its pending table, the event-correlation
//! loop, the stale-state reaper, and the health monitor. One engine owns
//! one session; the in-memory registry is owned state handed explicitly
//! to the components that need it, never a global.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ringline_call_engine::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let mut config = CallEngineConfig::default();
//! config.ami.host = "pbx.internal".to_string();
//! config.ami.secret = "s3cret".to_string();
//!
//! let store = Arc::new(MemoryCallStore::new());
//! let engine = CallEngine::new(
//!     config,
//!     store,
//!     Arc::new(NullContactDirectory),
//!     Arc::new(NullNotifier),
//! )?;
//! engine.start().await;
//!
//! let outcome = engine
//!     .originate(OriginateParams {
//!         to_number: "14045551234".into(),
//!         from_number: "+14045550000".into(),
//!         transfer_number: Some("4045559999".into()),
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("call id: {}", outcome.call_id);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use ringline_ami_client::{ConnectionManager, ManagerClient};
use ringline_ami_core::event::AmiEvent;

use crate::config::CallEngineConfig;
use crate::contacts::ContactDirectory;
use crate::error::{CallEngineError, Result};
use crate::notifier::CompletionNotifier;
use crate::store::CallRecordStore;

use super::correlator::EventCorrelator;
use super::health::HealthMonitor;
use super::originator::CallOriginator;
use super::reaper::StaleStateReaper;
use super::registry::ActiveCallRegistry;
use super::types::{EngineStats, OriginateOutcome, OriginateParams};

/// The call origination and event-correlation engine.
pub struct CallEngine {
    config: Arc<CallEngineConfig>,
    manager: Arc<ConnectionManager>,
    client: ManagerClient,
    registry: Arc<ActiveCallRegistry>,
    store: Arc<dyn CallRecordStore>,
    originator: Arc<CallOriginator>,
    correlator: Arc<EventCorrelator>,
    reaper: Arc<StaleStateReaper>,
    health: Arc<HealthMonitor>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CallEngine {
    /// Build an engine from configuration and its three collaborator
    /// seams. Validates the configuration; performs no I/O.
    pub fn new(
        config: CallEngineConfig,
        store: Arc<dyn CallRecordStore>,
        contacts: Arc<dyn ContactDirectory>,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Result<Arc<Self>> {
        config.validate().map_err(CallEngineError::configuration)?;
        let config = Arc::new(config);

        let manager = Arc::new(ConnectionManager::new(config.ami.to_client_config()));
        let client = manager.client();
        let registry = Arc::new(ActiveCallRegistry::new());
        let originator = Arc::new(CallOriginator::new(config.clone(), manager.clone()));
        let correlator = Arc::new(
            EventCorrelator::new(
                config.clone(),
                registry.clone(),
                store.clone(),
                contacts,
                notifier,
            )
            .with_originator(originator.clone()),
        );
        let reaper = Arc::new(StaleStateReaper::new(
            config.clone(),
            registry.clone(),
            store.clone(),
        ));
        let health = Arc::new(HealthMonitor::new(config.clone(), manager.clone()));

        Ok(Arc::new(Self {
            config,
            manager,
            client,
            registry,
            store,
            originator,
            correlator,
            reaper,
            health,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Bring the engine up: one eager connection attempt (failure is
    /// non-fatal; the supervisor keeps retrying), then the background
    /// loops: session supervision, event correlation, pending-table
    /// sweep, stale-state reaping, and health probing.
    pub async fn start(self: &Arc<Self>) {
        info!("🚀 Starting call engine against {}:{}", self.config.ami.host, self.config.ami.port);

        if !self.manager.ensure_connected().await {
            warn!(
                "Manager session not yet available; reconnecting every {:?}",
                self.config.ami.reconnect_interval
            );
        }

        let mut tasks = self.tasks.lock();
        tasks.push(self.manager.spawn_supervisor());
        tasks.push(self.spawn_event_loop());
        tasks.push(self.originator.spawn_sweeper());
        tasks.push(self.reaper.spawn());
        tasks.push(self.health.clone().spawn());

        info!("✅ Call engine started");
    }

    fn spawn_event_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = self.clone();
        let mut events = self.client.events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(AmiEvent::OriginateResponse {
                        action_id,
                        response,
                        reason,
                        unique_id,
                        channel,
                        ..
                    }) => {
                        engine.originator.handle_originate_response(
                            action_id.as_ref(),
                            &response,
                            reason.as_deref(),
                            unique_id.as_deref(),
                            channel.as_deref(),
                        );
                    }
                    Ok(event) => engine.correlator.handle_event(&event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        // Events lost to backpressure; the reaper and the
                        // hangup fallbacks absorb the gap.
                        warn!("Event loop lagged; {} events dropped", skipped);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Originate an outbound call. See
    /// [`CallOriginator::originate`](super::originator::CallOriginator::originate)
    /// for the completion contract.
    pub async fn originate(&self, params: OriginateParams) -> Result<OriginateOutcome> {
        self.originator.originate(params).await
    }

    /// Snapshot of engine state for monitoring surfaces.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            active_calls: self.registry.len(),
            pending_originations: self.originator.pending_count(),
            session_live: self.client.is_live(),
            total_originated: self.originator.total_originated(),
            total_completed: self.correlator.total_completed(),
        }
    }

    /// Whether the manager session is currently live.
    pub fn is_live(&self) -> bool {
        self.client.is_live()
    }

    pub fn config(&self) -> &CallEngineConfig {
        &self.config
    }

    /// The active-call registry, for monitoring surfaces.
    pub fn registry(&self) -> &Arc<ActiveCallRegistry> {
        &self.registry
    }

    /// The durable store handle the engine was built with.
    pub fn store(&self) -> &Arc<dyn CallRecordStore> {
        &self.store
    }

    /// Stop all background loops. The engine cannot be restarted.
    pub fn shutdown(&self) {
        info!("Stopping call engine");
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for CallEngine {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
