//! # Ringline AMI Core
//!
//! Protocol types for the Asterisk Manager Interface (AMI) as used by the
//! ringline stack. This crate is the pure protocol layer: it knows how to
//! frame, serialize, and parse manager traffic, and it gives every inbound
//! event a typed, tagged representation, but it performs no I/O. The
//! session itself lives in `ringline-ami-client`.
//!
//! ## Overview
//!
//! AMI is a line-oriented key/value protocol. Every message, whether an
//! outbound *action* or an inbound *event*, is a block of `Key: Value` lines
//! terminated by a blank line. The protocol offers no native correlation
//! between events and application-level calls, which is why the types here
//! preserve every identifier an event can carry (unique id, channel name,
//! action id, user-event headers): the call engine joins them later.
//!
//! ## Key Modules
//!
//! - [`frame`]: wire framing; parse and serialize key/value blocks
//! - [`action`]: typed outbound actions (`Login`, `Originate`, `Ping`, ...)
//! - [`event`]: typed inbound events with a lossless `Unknown` fallback
//! - [`channel`]: channel-state, hangup-cause, and dial-status vocabularies
//! - [`error`]: protocol error types
//!
//! ## Examples
//!
//! ```
//! use ringline_ami_core::action::{Action, ActionId, OriginateAction};
//!
//! let action = OriginateAction {
//!     channel: "PJSIP/+14045551234@trunk-east".into(),
//!     context: "ringline-outbound".into(),
//!     exten: "s".into(),
//!     priority: 1,
//!     caller_id: Some("+14045550000".into()),
//!     timeout_ms: Some(30_000),
//!     async_originate: true,
//!     variables: vec![("RL_CORRELATION_ID".into(), "req-1".into())],
//! };
//!
//! let wire = Action::Originate(action).serialize(&ActionId::from("req-1"));
//! assert!(wire.starts_with("Action: Originate\r\n"));
//! ```

pub mod action;
pub mod channel;
pub mod error;
pub mod event;
pub mod frame;

pub use action::{Action, ActionId, LoginAction, OriginateAction};
pub use channel::{ChannelState, DialStatus, HangupCause};
pub use error::{AmiError, Result};
pub use event::{AmiEvent, ResponseFrame};
pub use frame::{Frame, FrameBuffer};
