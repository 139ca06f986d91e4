//! Driver adapters for the messaging network.
//!
//! A driver owns the actual network client. Courier never speaks the network
//! protocol itself; it only:
//!
//! - calls [`Driver::initialize`], [`Driver::send_message`] and
//!   [`Driver::logout`]
//! - consumes the [`DriverEvent`]s the driver pushes into the channel it was
//!   constructed with
//!
//! [`SubprocessDriver`] is the production adapter: it runs an external driver
//! program and talks to it with the JSON Lines protocol defined in
//! `courier-driver-protocol`.

mod subprocess;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub use courier_driver_protocol::{DriverCommand, DriverEvent, DriverOutput, DriverReply};
pub use subprocess::SubprocessDriver;

/// Network-specific recipient address (e.g. `521234567890@c.us`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatId(String);

impl ChatId {
    /// Address of an individual user identified by their phone digits.
    pub fn user(digits: &str) -> Self {
        Self(format!("{digits}@c.us"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors surfaced by a driver call.
#[derive(Debug, Error)]
pub enum DriverError {
    /// No driver process is running; `initialize` has not succeeded yet.
    #[error("driver is not running")]
    NotRunning,

    /// The driver went away before answering.
    #[error("driver exited before replying")]
    Exited,

    /// The driver answered with a failure.
    #[error("driver rejected the command: {0}")]
    Rejected(String),

    #[error("driver io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("driver protocol error: {0}")]
    Protocol(String),
}

/// The messaging network client, seen from the session core.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Start the network client. Resolves once the driver has accepted the
    /// request; lifecycle progress is reported through events.
    async fn initialize(&self) -> Result<(), DriverError>;

    /// Send a text message. Resolves when the network acknowledged it.
    async fn send_message(&self, chat_id: &ChatId, body: &str) -> Result<(), DriverError>;

    /// Terminate the session and discard persisted credentials.
    async fn logout(&self) -> Result<(), DriverError>;
}
