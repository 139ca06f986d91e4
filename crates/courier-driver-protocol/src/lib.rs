//! Driver protocol types for Courier.
//!
//! A driver is the program that actually speaks the messaging network's
//! protocol (browser automation, websocket client, ...). Courier talks to it
//! over JSON Lines on stdio:
//!
//! - [`DriverCommand`]: one JSON object per line on the driver's stdin
//! - [`DriverOutput`]: one JSON object per line on the driver's stdout
//!
//! Every command carries a `request_id`; the driver answers each one with a
//! [`DriverOutput::Reply`] carrying the same id. Lifecycle outputs
//! (`pairing_code`, `authenticated`, `ready`, `disconnected`) may be written
//! at any time and are processed in the order they appear.
//!
//! ```text
//! -> {"type":"initialize","request_id":1,"session_id":"courier_local"}
//! <- {"type":"pairing_code","code":"2@AbC..."}
//! <- {"type":"reply","request_id":1,"ok":true}
//! <- {"type":"authenticated"}
//! <- {"type":"ready"}
//! -> {"type":"send_message","request_id":2,"chat_id":"521234567890@c.us","body":"hi"}
//! <- {"type":"reply","request_id":2,"ok":true}
//! ```

use serde::{Deserialize, Serialize};

/// Commands sent from Courier to the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverCommand {
    /// Start (or restart) the network client for the given session namespace.
    Initialize { request_id: u64, session_id: String },
    /// Send a text message to a network-specific chat id.
    SendMessage {
        request_id: u64,
        chat_id: String,
        body: String,
    },
    /// Log the session out and discard persisted credentials.
    Logout { request_id: u64 },
}

impl DriverCommand {
    pub fn request_id(&self) -> u64 {
        match self {
            Self::Initialize { request_id, .. }
            | Self::SendMessage { request_id, .. }
            | Self::Logout { request_id } => *request_id,
        }
    }
}

/// Lines written by the driver on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverOutput {
    /// A new pairing code must be scanned to authorize the session.
    PairingCode { code: String },
    /// Credentials were accepted.
    Authenticated,
    /// The session is ready to send messages.
    Ready,
    /// The session was lost.
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    /// Completion of a previously issued command.
    Reply {
        request_id: u64,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl DriverOutput {
    /// Split a line into either a lifecycle event or a command reply.
    pub fn into_event(self) -> Result<DriverEvent, DriverReply> {
        match self {
            Self::PairingCode { code } => Ok(DriverEvent::PairingCode { code }),
            Self::Authenticated => Ok(DriverEvent::Authenticated),
            Self::Ready => Ok(DriverEvent::Ready),
            Self::Disconnected { reason } => Ok(DriverEvent::Disconnected { reason }),
            Self::Reply {
                request_id,
                ok,
                error,
            } => Err(DriverReply {
                request_id,
                ok,
                error,
            }),
        }
    }
}

/// Session lifecycle events, in the order the driver emitted them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    PairingCode { code: String },
    Authenticated,
    Ready,
    Disconnected { reason: String },
}

impl DriverEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PairingCode { .. } => "pairing_code",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::Disconnected { .. } => "disconnected",
        }
    }
}

/// Outcome of a single command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverReply {
    pub request_id: u64,
    pub ok: bool,
    pub error: Option<String>,
}
