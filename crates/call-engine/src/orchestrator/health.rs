//! Session health monitoring
//!
//! While the session reports live, a lightweight `Ping` goes out every
//! sixty seconds. A failed probe clears liveness, which hands recovery to
//! the connection supervisor's reconnect loop; when the session is
//! already down, there is nothing to probe and the monitor stays quiet.

use std::sync::Arc;

use tracing::{debug, warn};

use ringline_ami_client::{ConnectionManager, ManagerClient};

use crate::config::CallEngineConfig;

/// Periodically verifies the manager session is responsive.
pub struct HealthMonitor {
    config: Arc<CallEngineConfig>,
    manager: Arc<ConnectionManager>,
    client: ManagerClient,
}

impl HealthMonitor {
    pub fn new(config: Arc<CallEngineConfig>, manager: Arc<ConnectionManager>) -> Self {
        let client = manager.client();
        Self { config, manager, client }
    }

    /// One probe: ping if live, demote on failure.
    pub async fn check(&self) {
        if !self.client.is_live() {
            debug!("Health check skipped; session is down");
            return;
        }
        match self.client.ping().await {
            Ok(()) => debug!("Health check ok"),
            Err(e) => {
                warn!("💔 Health check failed, marking session not-live: {}", e);
                self.manager.mark_not_live();
            }
        }
    }

    /// Spawn the 60-second probe loop.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.config.monitoring.health_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The immediate first tick would probe before login finishes.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.check().await;
            }
        })
    }
}
