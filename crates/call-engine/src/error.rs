use thiserror::Error;

/// Structured failure for a call origination request
///
/// Three kinds the underlying protocol forces apart: the PBX answered and
/// said no, the request never made it onto the wire, or nothing came back
/// at all.
#[derive(Error, Debug, Clone)]
pub enum OriginateFailure {
    /// The manager reported a failure for this origination
    ///
    /// Carries whatever the endpoint included: response code, reason,
    /// message, and the channel it tried to create.
    #[error("origination rejected by PBX (response={response}, reason={reason:?}, message={message:?}, channel={channel:?})")]
    Rejected {
        response: String,
        reason: Option<String>,
        message: Option<String>,
        channel: Option<String>,
    },

    /// The request could not be delivered to the manager endpoint
    #[error("origination request could not be sent: {0}")]
    SendFailed(String),

    /// No origination response event arrived within the deadline
    #[error("no origination response within {0} seconds")]
    Timeout(u64),
}

/// Error types for call engine operations
///
/// Covers the origination path, event correlation, persistence, and
/// configuration. Event-handling errors are caught and logged per-event
/// inside the correlator; these types surface at the public API instead.
#[derive(Error, Debug)]
pub enum CallEngineError {
    /// The manager session is down and one reconnect attempt did not
    /// bring it back
    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// A call origination failed; see [`OriginateFailure`] for the kind
    #[error("Origination failed: {0}")]
    Origination(#[from] OriginateFailure),

    /// Durable call-record store errors
    ///
    /// Connection failures, SQL errors, and serialization problems from
    /// the persistence collaborator.
    #[error("Store error: {0}")]
    Store(String),

    /// Event correlation errors
    ///
    /// A malformed or uninterpretable event payload. These never escape
    /// the event loop; they exist so handlers can early-return cleanly.
    #[error("Correlation error: {0}")]
    Correlation(String),

    /// Configuration validation errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Requested record or call could not be located
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unexpected internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for CallEngineError {
    fn from(err: anyhow::Error) -> Self {
        // Lower-level components report through anyhow; by the time an
        // error gets here it is unexpected.
        Self::Internal(err.to_string())
    }
}

impl CallEngineError {
    /// Create a new ConnectionUnavailable error with the provided message
    pub fn connection_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionUnavailable(msg.into())
    }

    /// Create a new Store error with the provided message
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }

    /// Create a new Correlation error with the provided message
    pub fn correlation<S: Into<String>>(msg: S) -> Self {
        Self::Correlation(msg.into())
    }

    /// Create a new Configuration error with the provided message
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new NotFound error with the provided message
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Internal error with the provided message
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for call engine operations
pub type Result<T> = std::result::Result<T, CallEngineError>;
