use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Comprehensive call engine configuration
///
/// The main configuration structure covering every aspect of engine
/// operation: the manager session, origination policy, event correlation,
/// stale-state reaping, and health monitoring.
///
/// # Configuration Sections
///
/// - [`ami`](Self::ami): manager endpoint, credentials, reconnect policy
/// - [`origination`](Self::origination): dial defaults, pending-request table limits
/// - [`correlation`](Self::correlation): dialplan context filter, lookup windows
/// - [`reaper`](Self::reaper): stale-state eviction and force-termination
/// - [`monitoring`](Self::monitoring): session liveness probing
///
/// # Examples
///
/// ```
/// use ringline_call_engine::config::CallEngineConfig;
///
/// let mut config = CallEngineConfig::default();
/// config.ami.host = "pbx.internal".to_string();
/// config.ami.secret = "s3cret".to_string();
/// config.origination.default_trunk = "trunk-east".to_string();
///
/// config.validate().expect("configuration should be valid");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CallEngineConfig {
    /// Manager session settings
    pub ami: AmiSettings,

    /// Call origination settings
    pub origination: OriginationConfig,

    /// Event correlation settings
    pub correlation: CorrelationConfig,

    /// Stale-state reaper settings
    pub reaper: ReaperConfig,

    /// Health monitoring settings
    pub monitoring: MonitoringConfig,
}

/// Manager endpoint and session policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmiSettings {
    /// Manager endpoint host
    pub host: String,

    /// Manager endpoint port
    pub port: u16,

    /// Manager username
    pub username: String,

    /// Manager secret
    pub secret: String,

    /// Fixed delay between reconnect attempts
    ///
    /// Deliberately a flat interval with no backoff or jitter. Changing
    /// this policy is a behavior change, not a tuning knob.
    pub reconnect_interval: Duration,

    /// How long to wait for any action's `Response` frame
    pub action_timeout: Duration,
}

impl Default for AmiSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5038,
            username: "ringline".to_string(),
            secret: String::new(),
            reconnect_interval: Duration::from_secs(5),
            action_timeout: Duration::from_secs(10),
        }
    }
}

impl AmiSettings {
    /// Convert to the session layer's config type.
    pub fn to_client_config(&self) -> ringline_ami_client::AmiConfig {
        ringline_ami_client::AmiConfig {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            secret: self.secret.clone(),
            reconnect_interval: self.reconnect_interval,
            action_timeout: self.action_timeout,
        }
    }
}

/// Call origination policy
///
/// The pending-request table limits exist because an origination whose
/// response event never arrives must not accumulate forever: the 35-second
/// response deadline bounds caller latency, and the sweep bounds memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginationConfig {
    /// Dialplan context answered calls are dropped into
    pub context: String,

    /// Extension within the context
    pub extension: String,

    /// Priority within the extension
    pub priority: u32,

    /// Trunk used when the caller does not name one
    pub default_trunk: String,

    /// Country code prepended to bare national numbers
    pub default_country_code: String,

    /// How long the PBX lets the outbound leg ring
    pub ring_timeout: Duration,

    /// Deadline for the origination response event
    pub response_timeout: Duration,

    /// How often the pending-request table is swept
    pub pending_sweep_interval: Duration,

    /// Pending entries older than this are evicted by the sweep
    pub pending_max_age: Duration,

    /// Hard cap on pending entries; the sweep keeps the newest
    pub pending_max_entries: usize,
}

impl Default for OriginationConfig {
    fn default() -> Self {
        Self {
            context: "ringline-outbound".to_string(),
            extension: "s".to_string(),
            priority: 1,
            default_trunk: "trunk".to_string(),
            default_country_code: "1".to_string(),
            ring_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(35),
            pending_sweep_interval: Duration::from_secs(5),
            pending_max_age: Duration::from_secs(30),
            pending_max_entries: 50,
        }
    }
}

/// Event correlation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Only channel-creation events from this dialplan context are
    /// tracked; every other context is someone else's traffic
    pub dialplan_context: String,

    /// Window for attaching a fresh PBX call id to a recently created
    /// durable record by caller number
    pub attach_window: Duration,

    /// Window for the hangup fallback lookups by destination or caller
    /// number
    pub fallback_window: Duration,

    /// Duration above which a hung-up call counts as answered even
    /// without an answer event
    pub answered_duration_threshold: Duration,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            dialplan_context: "ringline-outbound".to_string(),
            attach_window: Duration::from_secs(5 * 60),
            fallback_window: Duration::from_secs(10 * 60),
            answered_duration_threshold: Duration::from_secs(3),
        }
    }
}

/// Stale-state reaper policy
///
/// The safety valve for calls whose terminating event never arrived: both
/// the in-memory registry and the durable store are swept so a lost hangup
/// cannot hold a phone number "active" forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Tick interval
    pub interval: Duration,

    /// In-memory entries older than this are evicted
    pub active_call_max_age: Duration,

    /// Durable records stuck in CONNECTED longer than this are
    /// force-terminated
    pub stuck_connected_after: Duration,

    /// Maximum records fetched per store query
    pub stuck_batch_size: usize,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            active_call_max_age: Duration::from_secs(5 * 60),
            stuck_connected_after: Duration::from_secs(10 * 60),
            stuck_batch_size: 100,
        }
    }
}

/// Health monitoring policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Interval between liveness probes while the session is up
    pub health_check_interval: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(60),
        }
    }
}

impl CallEngineConfig {
    /// Validate the configuration, returning a description of the first
    /// problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.ami.host.is_empty() {
            return Err("ami.host must not be empty".to_string());
        }
        if self.ami.username.is_empty() {
            return Err("ami.username must not be empty".to_string());
        }
        if self.origination.context.is_empty() {
            return Err("origination.context must not be empty".to_string());
        }
        if self.origination.extension.is_empty() {
            return Err("origination.extension must not be empty".to_string());
        }
        if self.origination.default_country_code.is_empty()
            || !self.origination.default_country_code.chars().all(|c| c.is_ascii_digit())
        {
            return Err("origination.default_country_code must be a digit string".to_string());
        }
        if self.origination.response_timeout.is_zero() {
            return Err("origination.response_timeout must be positive".to_string());
        }
        if self.origination.pending_max_entries == 0 {
            return Err("origination.pending_max_entries must be positive".to_string());
        }
        if self.correlation.dialplan_context.is_empty() {
            return Err("correlation.dialplan_context must not be empty".to_string());
        }
        if self.reaper.stuck_batch_size == 0 {
            return Err("reaper.stuck_batch_size must be positive".to_string());
        }
        Ok(())
    }
}
