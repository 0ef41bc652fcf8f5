//! Completion notification boundary
//!
//! When a hangup fully resolves, the workflow engine gets told once,
//! best-effort. A notification failure is logged by the caller and never
//! affects hangup processing itself.

use async_trait::async_trait;

use crate::store::{CallStatus, Disposition};

/// The workflow-engine collaborator's surface.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    /// Report one terminal hangup resolution.
    async fn notify_call_completed(
        &self,
        call_id: &str,
        status: CallStatus,
        disposition: Disposition,
        destination_number: &str,
    ) -> anyhow::Result<()>;
}

/// No-op notifier for deployments without a workflow engine attached.
#[derive(Default)]
pub struct NullNotifier;

#[async_trait]
impl CompletionNotifier for NullNotifier {
    async fn notify_call_completed(
        &self,
        _call_id: &str,
        _status: CallStatus,
        _disposition: Disposition,
        _destination_number: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
