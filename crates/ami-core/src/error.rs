use thiserror::Error;

/// Error types for AMI protocol handling
///
/// Covers framing, parsing, and authentication failures. Transport errors
/// belong to `ringline-ami-client`; this crate only ever fails on malformed
/// or unexpected protocol data.
#[derive(Error, Debug)]
pub enum AmiError {
    /// A frame could not be parsed from the wire
    ///
    /// The manager emitted a block that is not a well-formed sequence of
    /// `Key: Value` lines.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// A frame was well-formed but missing a field the protocol requires
    #[error("Missing field '{field}' in {kind} frame")]
    MissingField {
        /// Frame kind ("event", "response", ...)
        kind: &'static str,
        /// The absent key
        field: &'static str,
    },

    /// Authentication was rejected by the manager
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A numeric field carried a non-numeric value
    #[error("Invalid numeric value for '{field}': {value}")]
    InvalidNumber {
        field: &'static str,
        value: String,
    },
}

impl AmiError {
    /// Create a new MalformedFrame error with the provided message
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::MalformedFrame(msg.into())
    }
}

/// Result type for AMI protocol operations
pub type Result<T> = std::result::Result<T, AmiError>;
