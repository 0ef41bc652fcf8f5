//! Typed inbound manager events
//!
//! The manager emits a flat stream of frames. [`AmiEvent::from_frame`]
//! turns each into a tagged variant carrying every identifier the frame
//! had (unique id, channel name, action id, user-event headers) because
//! no single one of them is guaranteed to be present, and the call engine
//! needs all of them for its fallback matching.

use std::collections::HashMap;

use serde_json::Value;

use crate::action::ActionId;
use crate::channel::{ChannelState, DialStatus, HangupCause};
use crate::error::Result;
use crate::frame::Frame;

/// Ack frame for a previously sent action (`Response: Success|Error`).
#[derive(Debug, Clone)]
pub struct ResponseFrame {
    pub action_id: Option<ActionId>,
    pub response: String,
    pub message: Option<String>,
}

impl ResponseFrame {
    pub fn is_success(&self) -> bool {
        self.response.eq_ignore_ascii_case("success")
            || self.response.eq_ignore_ascii_case("pong")
    }
}

/// All inbound traffic, parsed into tagged variants.
///
/// Frames whose event type the stack does not branch on land in
/// [`AmiEvent::Unknown`] with the original frame intact, so audit trails
/// and diagnostics lose nothing.
#[derive(Debug, Clone)]
pub enum AmiEvent {
    /// Deferred outcome of an `Async: true` origination.
    OriginateResponse {
        action_id: Option<ActionId>,
        response: String,
        reason: Option<String>,
        unique_id: Option<String>,
        channel: Option<String>,
        exten: Option<String>,
        context: Option<String>,
    },
    /// A channel came into existence.
    Newchannel {
        unique_id: String,
        channel: String,
        caller_id_num: Option<String>,
        exten: Option<String>,
        context: Option<String>,
        channel_state: Option<ChannelState>,
    },
    /// A channel changed state.
    Newstate {
        unique_id: String,
        channel: Option<String>,
        channel_state: Option<ChannelState>,
        channel_state_desc: Option<String>,
    },
    /// A dial attempt finished.
    DialEnd {
        unique_id: String,
        dest_unique_id: Option<String>,
        dest_channel: Option<String>,
        dial_status: DialStatus,
    },
    /// Two channels were bridged (or unbridged). Informational.
    Bridge {
        bridge_state: Option<String>,
        unique_id1: Option<String>,
        unique_id2: Option<String>,
        channel1: Option<String>,
        channel2: Option<String>,
    },
    /// Application-defined event raised from the dialplan.
    UserEvent {
        user_event: String,
        unique_id: Option<String>,
        headers: HashMap<String, String>,
    },
    /// A channel hung up. Terminal.
    Hangup {
        unique_id: String,
        channel: Option<String>,
        caller_id_num: Option<String>,
        cause: HangupCause,
        cause_txt: Option<String>,
    },
    /// Action ack.
    Response(ResponseFrame),
    /// Anything else, kept verbatim.
    Unknown { event: String, frame: Frame },
}

impl AmiEvent {
    /// Parse a frame into a typed event.
    pub fn from_frame(frame: Frame) -> Result<AmiEvent> {
        if let Some(response) = frame.get("Response") {
            // OriginateResponse arrives as an Event, not a Response frame;
            // plain acks have no Event header.
            if frame.get("Event").is_none() {
                return Ok(AmiEvent::Response(ResponseFrame {
                    action_id: frame.get_owned("ActionID").map(ActionId::from),
                    response: response.to_string(),
                    message: frame.get_owned("Message"),
                }));
            }
        }

        let event = frame.require("event", "Event")?.to_string();
        match event.as_str() {
            "OriginateResponse" => Ok(AmiEvent::OriginateResponse {
                action_id: frame.get_owned("ActionID").map(ActionId::from),
                response: frame.get_owned("Response").unwrap_or_default(),
                reason: frame.get_owned("Reason"),
                unique_id: frame.get_owned("Uniqueid").filter(|v| v != "<null>"),
                channel: frame.get_owned("Channel"),
                exten: frame.get_owned("Exten"),
                context: frame.get_owned("Context"),
            }),
            "Newchannel" => Ok(AmiEvent::Newchannel {
                unique_id: frame.require("Newchannel", "Uniqueid")?.to_string(),
                channel: frame.require("Newchannel", "Channel")?.to_string(),
                caller_id_num: frame.get_owned("CallerIDNum"),
                exten: frame.get_owned("Exten"),
                context: frame.get_owned("Context"),
                channel_state: frame.get_u32("ChannelState")?.map(ChannelState::from_code),
            }),
            "Newstate" => Ok(AmiEvent::Newstate {
                unique_id: frame.require("Newstate", "Uniqueid")?.to_string(),
                channel: frame.get_owned("Channel"),
                channel_state: frame.get_u32("ChannelState")?.map(ChannelState::from_code),
                channel_state_desc: frame.get_owned("ChannelStateDesc"),
            }),
            "DialEnd" | "Dial" => Ok(AmiEvent::DialEnd {
                unique_id: frame.require("DialEnd", "Uniqueid")?.to_string(),
                dest_unique_id: frame.get_owned("DestUniqueid"),
                dest_channel: frame.get_owned("DestChannel"),
                dial_status: DialStatus::parse(frame.get("DialStatus").unwrap_or("")),
            }),
            "BridgeEnter" | "Bridge" => Ok(AmiEvent::Bridge {
                bridge_state: frame
                    .get_owned("Bridgestate")
                    .or_else(|| frame.get_owned("BridgeState")),
                unique_id1: frame
                    .get_owned("Uniqueid1")
                    .or_else(|| frame.get_owned("Uniqueid")),
                unique_id2: frame.get_owned("Uniqueid2"),
                channel1: frame
                    .get_owned("Channel1")
                    .or_else(|| frame.get_owned("Channel")),
                channel2: frame.get_owned("Channel2"),
            }),
            "UserEvent" => {
                let user_event = frame.require("UserEvent", "UserEvent")?.to_string();
                let mut headers = HashMap::new();
                for (key, value) in frame.headers() {
                    if !key.eq_ignore_ascii_case("Event")
                        && !key.eq_ignore_ascii_case("UserEvent")
                        && !key.is_empty()
                    {
                        headers.insert(key.clone(), value.clone());
                    }
                }
                Ok(AmiEvent::UserEvent {
                    user_event,
                    unique_id: frame.get_owned("Uniqueid"),
                    headers,
                })
            }
            "Hangup" => Ok(AmiEvent::Hangup {
                unique_id: frame.require("Hangup", "Uniqueid")?.to_string(),
                channel: frame.get_owned("Channel"),
                caller_id_num: frame.get_owned("CallerIDNum"),
                cause: HangupCause(frame.get_u32("Cause")?.unwrap_or(0)),
                cause_txt: frame.get_owned("Cause-txt"),
            }),
            _ => Ok(AmiEvent::Unknown { event, frame }),
        }
    }

    /// Wire event name, for logging and audit entries.
    pub fn name(&self) -> &str {
        match self {
            AmiEvent::OriginateResponse { .. } => "OriginateResponse",
            AmiEvent::Newchannel { .. } => "Newchannel",
            AmiEvent::Newstate { .. } => "Newstate",
            AmiEvent::DialEnd { .. } => "DialEnd",
            AmiEvent::Bridge { .. } => "Bridge",
            AmiEvent::UserEvent { .. } => "UserEvent",
            AmiEvent::Hangup { .. } => "Hangup",
            AmiEvent::Response(_) => "Response",
            AmiEvent::Unknown { event, .. } => event.as_str(),
        }
    }

    /// JSON rendering of the event for audit-log payloads.
    pub fn to_audit_payload(&self) -> Value {
        match self {
            AmiEvent::OriginateResponse { action_id, response, reason, unique_id, channel, .. } => {
                serde_json::json!({
                    "actionId": action_id.as_ref().map(|id| id.to_string()),
                    "response": response,
                    "reason": reason,
                    "uniqueId": unique_id,
                    "channel": channel,
                })
            }
            AmiEvent::Newchannel { unique_id, channel, caller_id_num, context, .. } => {
                serde_json::json!({
                    "uniqueId": unique_id,
                    "channel": channel,
                    "callerIdNum": caller_id_num,
                    "context": context,
                })
            }
            AmiEvent::Newstate { unique_id, channel_state, channel_state_desc, .. } => {
                serde_json::json!({
                    "uniqueId": unique_id,
                    "channelState": channel_state.map(|s| s.code()),
                    "channelStateDesc": channel_state_desc,
                })
            }
            AmiEvent::DialEnd { unique_id, dest_channel, dial_status, .. } => {
                serde_json::json!({
                    "uniqueId": unique_id,
                    "destChannel": dest_channel,
                    "dialStatus": dial_status.as_str(),
                })
            }
            AmiEvent::Bridge { bridge_state, unique_id1, unique_id2, .. } => {
                serde_json::json!({
                    "bridgeState": bridge_state,
                    "uniqueId1": unique_id1,
                    "uniqueId2": unique_id2,
                })
            }
            AmiEvent::UserEvent { user_event, unique_id, headers } => {
                serde_json::json!({
                    "userEvent": user_event,
                    "uniqueId": unique_id,
                    "headers": headers,
                })
            }
            AmiEvent::Hangup { unique_id, channel, caller_id_num, cause, cause_txt } => {
                serde_json::json!({
                    "uniqueId": unique_id,
                    "channel": channel,
                    "callerIdNum": caller_id_num,
                    "cause": cause.code(),
                    "causeTxt": cause_txt,
                })
            }
            AmiEvent::Response(response) => serde_json::json!({
                "response": response.response,
                "message": response.message,
            }),
            AmiEvent::Unknown { event, frame } => {
                let headers: HashMap<&str, &str> = frame
                    .headers()
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                serde_json::json!({ "event": event, "headers": headers })
            }
        }
    }
}
