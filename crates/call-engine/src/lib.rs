//! # Ringline Call Engine
//!
//! The call origination and event-correlation engine of the ringline
//! stack. It places telephone calls through an AMI-style PBX manager
//! session and reconciles the protocol's asynchronous, unordered,
//! partially-identified event stream into a single coherent record per
//! call.
//!
//! ## Overview
//!
//! The underlying protocol offers no native way to join events to
//! application-level calls: events may arrive out of order, some
//! identifiers are unknown when a call starts, some events never arrive
//! at all, and one logical call can be referenced by up to four different
//! identifiers depending on which event is inspected. This crate exists
//! to absorb that mess:
//!
//! - **Call Origination**: outbound requests correlated to their eventual
//!   response events by a locally generated request id, with a hard
//!   35-second completion deadline and a self-trimming pending table
//! - **Event Correlation**: a per-event-type state machine over in-memory
//!   call state and the durable record, with multi-strategy fallback
//!   lookups when the primary identifier is unknown
//! - **Active Call Registry**: call-id and channel-name indexes mutated
//!   together, never left inconsistent
//! - **Stale-State Reaping**: self-healing cleanup of state whose
//!   terminating event never arrived
//! - **Session Supervision**: one persistent authenticated session,
//!   reconnected on a fixed interval, probed for liveness
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │                CallEngine                │
//! ├──────────────────────────────────────────┤
//! │ ┌──────────────┐  ┌────────────────────┐ │
//! │ │ Call         │  │ Event              │ │
//! │ │ Originator   │  │ Correlator         │ │
//! │ └──────────────┘  └────────────────────┘ │
//! │ ┌──────────────┐  ┌──────────┐ ┌───────┐ │
//! │ │ ActiveCall   │  │ Stale    │ │Health │ │
//! │ │ Registry     │  │ Reaper   │ │Monitor│ │
//! │ └──────────────┘  └──────────┘ └───────┘ │
//! └──────────────────────────────────────────┘
//!          │                    │
//! ┌─────────────────┐  ┌─────────────────┐
//! │ Manager Session │  │ CallRecordStore │
//! │ (ami-client)    │  │ (sqlx/SQLite)   │
//! └─────────────────┘  └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ringline_call_engine::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let mut config = CallEngineConfig::default();
//! config.ami.host = "pbx.internal".to_string();
//! config.ami.username = "ringline".to_string();
//! config.ami.secret = "s3cret".to_string();
//! config.origination.default_trunk = "trunk-east".to_string();
//!
//! let store = Arc::new(ringline_call_engine::database::SqliteCallStore::new("sqlite:ringline.db").await?);
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
//!         amd_enabled: true,
//!         ..Default::default()
//!     })
//!     .await?;
//!
//! println!("PBX accepted the call as {}", outcome.call_id);
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Modules
//!
//! - [`orchestrator`]: origination, correlation, registry, reaper, health
//! - [`store`]: the durable call-record boundary and in-memory test store
//! - [`database`]: sqlx/SQLite production store
//! - [`contacts`]: CRM contact-directory boundary
//! - [`notifier`]: workflow-engine completion notification boundary
//! - [`numbers`]: the two driver-mandated number normalization forms
//! - [`config`]: configuration management and validation
//! - [`error`]: error types, including structured origination failures

// Core modules
pub mod config;
pub mod error;

// Orchestration
pub mod orchestrator;

// Collaborator boundaries
pub mod contacts;
pub mod notifier;
pub mod store;

// Persistence
pub mod database;

// Utilities
pub mod numbers;

// Re-exports for convenience
pub use config::CallEngineConfig;
pub use error::{CallEngineError, OriginateFailure, Result};
pub use orchestrator::core::CallEngine;

/// Prelude module for convenient imports
///
/// ```
/// use ringline_call_engine::prelude::*;
/// ```
pub mod prelude {
    //! Commonly used types for call engine applications

    pub use crate::{CallEngineConfig, CallEngineError, OriginateFailure, Result};

    pub use crate::orchestrator::core::CallEngine;
    pub use crate::orchestrator::{
        ActiveCall, ActiveCallRegistry, CallId, CorrelationId, EngineStats, EventCorrelator,
        OriginateOutcome, OriginateParams, RequestId, StaleStateReaper,
    };

    pub use crate::config::{
        AmiSettings, CorrelationConfig, MonitoringConfig, OriginationConfig, ReaperConfig,
    };

    pub use crate::store::{
        AuditEntry, CallRecord, CallRecordStore, CallRecordUpdate, CallStatus, Disposition,
        MemoryCallStore,
    };
    pub use crate::contacts::{Contact, ContactDirectory, ContactStatus, NullContactDirectory};
    pub use crate::notifier::{CompletionNotifier, NullNotifier};

    // Session layer types
    pub use ringline_ami_client::{AmiConfig, ConnectionManager, ManagerClient};
    pub use ringline_ami_core::{AmiEvent, ChannelState, DialStatus, HangupCause};

    // Common external types
    pub use chrono::{DateTime, Utc};
}
