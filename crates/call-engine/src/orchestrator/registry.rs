//! Active call registry
//!
//! Two associative structures kept mutually consistent: call-id → call
//! state, and channel-name → call-id. Every mutation happens inside a
//! single lock scope so no entry can ever exist in only one of the two
//! maps, regardless of how channel-created and hangup events interleave.
//!
//! The registry is an owned value passed explicitly to the correlator and
//! the reaper, never ambient global state, so each test can run against
//! an isolated instance.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use super::types::{ActiveCall, CallId};

#[derive(Default)]
struct Inner {
    calls: HashMap<String, ActiveCall>,
    channels: HashMap<String, String>,
}

/// In-memory store of per-call state plus the channel-name index.
#[derive(Default)]
pub struct ActiveCallRegistry {
    inner: Mutex<Inner>,
}

impl ActiveCallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a call, indexing its channel name. Replacing an existing
    /// entry re-indexes the channel atomically.
    pub fn insert(&self, call: ActiveCall) {
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.calls.get(call.call_id.as_str()) {
            let stale = previous.channel.clone();
            inner.channels.remove(&stale);
        }
        inner
            .channels
            .insert(call.channel.clone(), call.call_id.as_str().to_string());
        inner.calls.insert(call.call_id.as_str().to_string(), call);
    }

    /// Clone of the call state, if tracked.
    pub fn get(&self, call_id: &str) -> Option<ActiveCall> {
        self.inner.lock().calls.get(call_id).cloned()
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.inner.lock().calls.contains_key(call_id)
    }

    /// Mutate a tracked call in place, inside the lock.
    pub fn with_call_mut<R>(
        &self,
        call_id: &str,
        f: impl FnOnce(&mut ActiveCall) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock();
        inner.calls.get_mut(call_id).map(f)
    }

    /// Remove a call and unindex its channel in the same lock scope.
    pub fn remove(&self, call_id: &str) -> Option<ActiveCall> {
        let mut inner = self.inner.lock();
        let call = inner.calls.remove(call_id)?;
        inner.channels.remove(&call.channel);
        Some(call)
    }

    /// Call id currently bound to a channel name.
    pub fn resolve_channel(&self, channel: &str) -> Option<CallId> {
        self.inner
            .lock()
            .channels
            .get(channel)
            .map(|id| CallId(id.clone()))
    }

    /// Evict everything older than `max_age`, returning the evicted calls.
    pub fn remove_older_than(&self, max_age: Duration) -> Vec<ActiveCall> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        let mut inner = self.inner.lock();
        let stale_ids: Vec<String> = inner
            .calls
            .iter()
            .filter(|(_, call)| call.created_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        let mut evicted = Vec::with_capacity(stale_ids.len());
        for id in stale_ids {
            if let Some(call) = inner.calls.remove(&id) {
                inner.channels.remove(&call.channel);
                evicted.push(call);
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.inner.lock().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().calls.is_empty()
    }

    /// Both map sizes, for the index-consistency invariant checks.
    pub fn index_sizes(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.calls.len(), inner.channels.len())
    }
}
