//! Command error taxonomy.

use thiserror::Error;

use crate::driver::DriverError;

/// Failure of a gateway command. The `Display` text is safe to return to
/// callers; driver details stay in `source`.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The session is not ready. Poll `/status` or `/qr` and retry.
    #[error("not connected")]
    NotConnected,

    /// The caller sent something unusable.
    #[error("{0}")]
    InvalidInput(String),

    /// The driver did not settle in time; the command may still take effect.
    #[error("timed out {action}")]
    Timeout { action: &'static str },

    /// The driver rejected the command.
    #[error("failed {action}")]
    UpstreamFailure {
        action: &'static str,
        #[source]
        source: DriverError,
    },

    #[error("internal error")]
    Internal(String),
}

impl CommandError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}
