//! Command gateway: the operations exposed to callers.
//!
//! Every command checks the session snapshot first and only then touches the
//! driver. Driver and timeout failures are mapped to [`CommandError`] here,
//! so no raw driver error reaches a caller.

mod error;
mod request;

use std::time::Duration;

use bytes::Bytes;
use tracing::{error, info, warn};

use crate::session::SessionMachine;

pub use error::CommandError;
pub use request::{Recipient, SendRequest};

/// Representation requested for the pairing artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingFormat {
    Image,
    Structured,
}

/// Answer to a pairing artifact lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingLookup {
    /// The session is ready; callers can stop polling.
    AlreadyConnected,
    /// No code has been issued yet (or rendering failed). Retry later.
    NotAvailable,
    Image(Bytes),
    Structured {
        data_uri: String,
        issued_at_ms: i64,
    },
}

#[derive(Clone)]
pub struct CommandGateway {
    session: SessionMachine,
    send_timeout: Duration,
}

impl CommandGateway {
    pub fn new(session: SessionMachine, send_timeout: Duration) -> Self {
        Self {
            session,
            send_timeout,
        }
    }

    pub fn session(&self) -> &SessionMachine {
        &self.session
    }

    /// Whether the session is ready for sending.
    pub fn status(&self) -> bool {
        self.session.snapshot().connected()
    }

    pub fn pairing_artifact(&self, format: PairingFormat) -> PairingLookup {
        let snapshot = self.session.snapshot();
        if snapshot.connected() {
            return PairingLookup::AlreadyConnected;
        }
        let Some(artifact) = snapshot.pairing() else {
            return PairingLookup::NotAvailable;
        };

        match format {
            PairingFormat::Image => PairingLookup::Image(artifact.png()),
            PairingFormat::Structured => PairingLookup::Structured {
                data_uri: artifact.data_uri().to_string(),
                issued_at_ms: artifact.issued_at().timestamp_millis(),
            },
        }
    }

    /// Send a text message, waiting at most the configured send timeout.
    ///
    /// The driver call runs on its own task. When the timer wins, that task
    /// is left running and its outcome is never reported.
    pub async fn send_message(&self, request: &SendRequest) -> Result<(), CommandError> {
        if !self.session.snapshot().connected() {
            return Err(CommandError::NotConnected);
        }
        let (recipient, body) = request.validate()?;

        let driver = self.session.driver();
        let chat_id = recipient.chat_id();
        let mut send = tokio::spawn(async move { driver.send_message(&chat_id, &body).await });

        tokio::select! {
            joined = &mut send => match joined {
                Ok(Ok(())) => {
                    info!(to = %recipient, "Message sent");
                    Ok(())
                }
                Ok(Err(e)) => {
                    error!(to = %recipient, error = %e, "Failed to send message");
                    Err(CommandError::UpstreamFailure {
                        action: "sending message",
                        source: e,
                    })
                }
                Err(e) => {
                    error!(to = %recipient, error = %e, "Send task failed");
                    Err(CommandError::Internal(e.to_string()))
                }
            },
            _ = tokio::time::sleep(self.send_timeout) => {
                warn!(
                    to = %recipient,
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "Timed out sending message"
                );
                Err(CommandError::Timeout { action: "sending message" })
            }
        }
    }

    pub async fn logout(&self) -> Result<(), CommandError> {
        self.session.logout().await.map_err(|e| {
            error!(error = %e, "Failed to log out");
            CommandError::UpstreamFailure {
                action: "logging out",
                source: e,
            }
        })
    }
}
