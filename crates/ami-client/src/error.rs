use thiserror::Error;

/// Error types for the manager session layer
#[derive(Error, Debug)]
pub enum AmiClientError {
    /// Transport-level failure (connect, read, write)
    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol-level failure from the framing/parsing layer
    #[error("Protocol error: {0}")]
    Protocol(#[from] ringline_ami_core::AmiError),

    /// The session is not currently established
    ///
    /// Surfaced to callers that try to send while the supervisor is between
    /// reconnect attempts.
    #[error("Manager session is not connected")]
    NotConnected,

    /// The manager rejected our credentials
    #[error("Login rejected: {0}")]
    LoginRejected(String),

    /// No response arrived for an action within the configured timeout
    #[error("Action '{action}' timed out after {seconds}s")]
    ActionTimeout { action: String, seconds: u64 },

    /// The manager answered an action with `Response: Error`
    #[error("Action '{action}' failed: {message}")]
    ActionFailed { action: String, message: String },
}

impl AmiClientError {
    pub fn action_failed<S: Into<String>>(action: &str, message: S) -> Self {
        Self::ActionFailed {
            action: action.to_string(),
            message: message.into(),
        }
    }
}

/// Result type for manager session operations
pub type Result<T> = std::result::Result<T, AmiClientError>;
