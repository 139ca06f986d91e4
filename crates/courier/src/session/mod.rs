//! Session lifecycle tracking.
//!
//! There is exactly one session. Its state moves through:
//!
//! ```text
//! Idle ─► Initializing ─► PairingPending ─► Authenticated ─► Ready
//!              ▲                │  ▲                            │
//!              │                └──┘ (new code)                 │
//!              └──────────── disconnected / logout ◄────────────┘
//! ```
//!
//! [`SessionMachine`] is the only writer. Everything else reads
//! [`SessionSnapshot`]s.

mod machine;
mod pairing;
mod state;

pub use machine::{InitOutcome, LOGOUT_REINIT_GRACE, SessionMachine};
pub use pairing::PairingArtifact;
pub use state::{SessionPhase, SessionSnapshot};
