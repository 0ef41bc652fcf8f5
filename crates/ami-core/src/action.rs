//! Typed outbound manager actions
//!
//! Every action carries an [`ActionId`] so the session layer can correlate
//! the manager's `Response` frame (and, for async originations, the
//! eventual `OriginateResponse` event) back to the request that caused it.

use std::fmt;

use crate::frame::Frame;

/// Locally generated identifier transmitted as `ActionID`.
///
/// For originations this doubles as the request id the call engine keys its
/// pending table by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionId(pub String);

impl ActionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ActionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Credentials for the `Login` action.
#[derive(Debug, Clone)]
pub struct LoginAction {
    pub username: String,
    pub secret: String,
}

/// The `Originate` action: ask the PBX to place an outbound call.
///
/// `variables` become one `Variable: key=value` line each and are the only
/// way to smuggle application identifiers (correlation id, transfer target,
/// audio references) into the dialplan so later events can be joined back
/// to the request.
#[derive(Debug, Clone)]
pub struct OriginateAction {
    /// Dial string for the outbound leg, e.g. `PJSIP/+14045551234@trunk`.
    pub channel: String,
    /// Dialplan context the answered call is dropped into.
    pub context: String,
    /// Extension within the context.
    pub exten: String,
    /// Priority within the extension.
    pub priority: u32,
    /// Caller id presented to the callee.
    pub caller_id: Option<String>,
    /// How long the PBX lets the leg ring, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// `Async: true` makes the manager ack immediately and report the
    /// outcome later via an `OriginateResponse` event.
    pub async_originate: bool,
    /// Call-setup variables, in transmission order.
    pub variables: Vec<(String, String)>,
}

/// All actions the ringline stack sends.
#[derive(Debug, Clone)]
pub enum Action {
    Login(LoginAction),
    Originate(OriginateAction),
    Ping,
    Logoff,
}

impl Action {
    /// Wire name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Login(_) => "Login",
            Action::Originate(_) => "Originate",
            Action::Ping => "Ping",
            Action::Logoff => "Logoff",
        }
    }

    /// Serialize to the wire form with the given action id.
    pub fn serialize(&self, action_id: &ActionId) -> String {
        let mut frame = Frame::new();
        frame.push("Action", self.name());
        frame.push("ActionID", action_id.as_str());
        match self {
            Action::Login(login) => {
                frame.push("Username", login.username.clone());
                frame.push("Secret", login.secret.clone());
            }
            Action::Originate(orig) => {
                frame.push("Channel", orig.channel.clone());
                frame.push("Context", orig.context.clone());
                frame.push("Exten", orig.exten.clone());
                frame.push("Priority", orig.priority.to_string());
                if let Some(caller_id) = &orig.caller_id {
                    frame.push("CallerID", caller_id.clone());
                }
                if let Some(timeout) = orig.timeout_ms {
                    frame.push("Timeout", timeout.to_string());
                }
                if orig.async_originate {
                    frame.push("Async", "true");
                }
                for (key, value) in &orig.variables {
                    frame.push("Variable", format!("{}={}", key, value));
                }
            }
            Action::Ping | Action::Logoff => {}
        }
        frame.serialize()
    }
}
