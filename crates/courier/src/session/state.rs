//! Session state snapshot.
//!
//! The fields are private; every transition goes through a method that keeps
//! `connected ⇒ authenticated` and the all-or-nothing pairing artifact intact.

use std::fmt;
use std::sync::Arc;

use super::pairing::PairingArtifact;

/// Point-in-time view of the session.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    connected: bool,
    authenticated: bool,
    initializing: bool,
    pairing: Option<Arc<PairingArtifact>>,
}

/// Coarse phase derived from the flags, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Initializing,
    PairingPending,
    Authenticated,
    Ready,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::PairingPending => "pairing_pending",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

impl SessionSnapshot {
    /// True only while the driver reports the session ready for sending.
    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn initializing(&self) -> bool {
        self.initializing
    }

    pub fn pairing(&self) -> Option<&Arc<PairingArtifact>> {
        self.pairing.as_ref()
    }

    pub fn phase(&self) -> SessionPhase {
        if self.connected {
            SessionPhase::Ready
        } else if self.authenticated {
            SessionPhase::Authenticated
        } else if self.pairing.is_some() {
            SessionPhase::PairingPending
        } else if self.initializing {
            SessionPhase::Initializing
        } else {
            SessionPhase::Idle
        }
    }

    // ------------------------------------------------------------------------
    // Transitions (session machine only)
    // ------------------------------------------------------------------------

    /// Claim the initialize slot. Returns false if one is already in flight.
    pub(super) fn try_begin_initialize(&mut self) -> bool {
        if self.initializing {
            return false;
        }
        self.initializing = true;
        true
    }

    pub(super) fn end_initialize(&mut self) {
        self.initializing = false;
    }

    /// A new pairing code means the session is not ready. `artifact` is
    /// `None` when rendering failed; the previous code is dropped either way.
    pub(super) fn pairing_issued(&mut self, artifact: Option<Arc<PairingArtifact>>) {
        self.connected = false;
        self.pairing = artifact;
    }

    pub(super) fn authenticated_by_driver(&mut self) {
        self.authenticated = true;
    }

    /// Ready implies the credentials were accepted.
    pub(super) fn ready(&mut self) {
        self.authenticated = true;
        self.connected = true;
        self.pairing = None;
    }

    pub(super) fn disconnected(&mut self) {
        self.connected = false;
        self.authenticated = false;
    }

    pub(super) fn logged_out(&mut self) {
        self.connected = false;
        self.authenticated = false;
        self.pairing = None;
    }
}
