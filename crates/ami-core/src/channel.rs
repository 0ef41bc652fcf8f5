//! Channel-state, hangup-cause, and dial-status vocabularies
//!
//! These are the protocol's enumerations the correlation logic keys off.
//! Only the values the engine actually branches on get named variants; the
//! rest are preserved numerically or textually so nothing is lost in audit
//! trails.

use std::fmt;

/// Channel state as reported by `Newchannel`/`Newstate` events.
///
/// State 6 (`Up`) is the one that matters: it is the answer signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Down,
    Reserved,
    OffHook,
    Dialing,
    Ring,
    Ringing,
    Up,
    Busy,
    DialingOffHook,
    PreRing,
    Other(u32),
}

impl ChannelState {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => ChannelState::Down,
            1 => ChannelState::Reserved,
            2 => ChannelState::OffHook,
            3 => ChannelState::Dialing,
            4 => ChannelState::Ring,
            5 => ChannelState::Ringing,
            6 => ChannelState::Up,
            7 => ChannelState::Busy,
            8 => ChannelState::DialingOffHook,
            9 => ChannelState::PreRing,
            other => ChannelState::Other(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            ChannelState::Down => 0,
            ChannelState::Reserved => 1,
            ChannelState::OffHook => 2,
            ChannelState::Dialing => 3,
            ChannelState::Ring => 4,
            ChannelState::Ringing => 5,
            ChannelState::Up => 6,
            ChannelState::Busy => 7,
            ChannelState::DialingOffHook => 8,
            ChannelState::PreRing => 9,
            ChannelState::Other(code) => *code,
        }
    }

    /// Whether this state denotes an answered channel.
    pub fn is_up(&self) -> bool {
        matches!(self, ChannelState::Up)
    }
}

/// Hangup cause code (Q.850 subset).
///
/// `NormalClearing` (16) and `Unknown` (0) feed the answered-call
/// heuristic; everything else is carried through for audit purposes only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HangupCause(pub u32);

impl HangupCause {
    pub const UNKNOWN: HangupCause = HangupCause(0);
    pub const NORMAL_CLEARING: HangupCause = HangupCause(16);
    pub const USER_BUSY: HangupCause = HangupCause(17);
    pub const NO_ANSWER: HangupCause = HangupCause(19);

    pub fn code(&self) -> u32 {
        self.0
    }

    /// Causes treated as "the call may well have been answered" by the
    /// hangup disposition heuristic.
    pub fn is_benign(&self) -> bool {
        *self == Self::NORMAL_CLEARING || *self == Self::UNKNOWN
    }
}

impl fmt::Display for HangupCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a dial attempt as reported by the `DialEnd` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialStatus {
    Answer,
    Busy,
    NoAnswer,
    Cancel,
    Congestion,
    ChanUnavail,
    Other(String),
}

impl DialStatus {
    /// Parse the `DialStatus` header; comparison is case-insensitive
    /// because the field casing varies between PBX versions.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ANSWER" => DialStatus::Answer,
            "BUSY" => DialStatus::Busy,
            "NOANSWER" => DialStatus::NoAnswer,
            "CANCEL" => DialStatus::Cancel,
            "CONGESTION" => DialStatus::Congestion,
            "CHANUNAVAIL" => DialStatus::ChanUnavail,
            _ => DialStatus::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DialStatus::Answer => "ANSWER",
            DialStatus::Busy => "BUSY",
            DialStatus::NoAnswer => "NOANSWER",
            DialStatus::Cancel => "CANCEL",
            DialStatus::Congestion => "CONGESTION",
            DialStatus::ChanUnavail => "CHANUNAVAIL",
            DialStatus::Other(raw) => raw.as_str(),
        }
    }
}

impl fmt::Display for DialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
