//! Connection supervision
//!
//! Exactly one authenticated session exists at a time. The supervisor loop
//! re-establishes it on a fixed interval after any drop; there is no
//! backoff and no jitter; the interval is policy, not tuning.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::{ManagerClient, Shared};
use crate::config::AmiConfig;

/// Owns the manager session lifecycle.
///
/// Create one per process, grab a [`ManagerClient`] from it, then
/// [`spawn_supervisor`](Self::spawn_supervisor). Components that need a
/// session *right now* (the call originator's precondition) can call
/// [`ensure_connected`](Self::ensure_connected) for a single eager attempt.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    /// Serializes connection attempts between the supervisor loop and
    /// eager callers so two sessions can never race into existence.
    connect_lock: Arc<Mutex<()>>,
}

impl ConnectionManager {
    pub fn new(config: AmiConfig) -> Self {
        Self {
            shared: Shared::new(config),
            connect_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Handle for sending actions and subscribing to events.
    pub fn client(&self) -> ManagerClient {
        ManagerClient { shared: self.shared.clone() }
    }

    /// Whether the session is currently live.
    pub fn is_live(&self) -> bool {
        self.shared.is_live()
    }

    /// One connection attempt if the session is down. Returns liveness
    /// afterward; never retries internally.
    pub async fn ensure_connected(&self) -> bool {
        if self.shared.is_live() {
            return true;
        }
        let _guard = self.connect_lock.lock().await;
        if self.shared.is_live() {
            return true;
        }
        match self.shared.establish().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Manager connection attempt failed: {}", e);
                false
            }
        }
    }

    /// Background supervision: reconnect on the fixed interval whenever
    /// the session is down, forever.
    pub fn spawn_supervisor(&self) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let connect_lock = self.connect_lock.clone();
        let interval = shared.config.reconnect_interval;
        tokio::spawn(async move {
            loop {
                if !shared.is_live() {
                    let _guard = connect_lock.lock().await;
                    if !shared.is_live() {
                        if let Err(e) = shared.establish().await {
                            warn!(
                                "Manager reconnect failed, retrying in {:?}: {}",
                                interval, e
                            );
                        }
                    }
                } else {
                    debug!("Manager session healthy");
                }
                tokio::time::sleep(interval).await;
            }
        })
    }

    /// Drop liveness so the supervisor reconnects. Used by the health
    /// monitor when a probe fails.
    pub fn mark_not_live(&self) {
        self.shared.mark_not_live();
    }
}
