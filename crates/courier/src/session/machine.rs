//! The session state machine.
//!
//! Driver events are applied one at a time by the event loop task. Readers
//! take snapshots from a `watch` channel, so they always observe a fully
//! applied transition.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::pairing::PairingArtifact;
use super::state::SessionSnapshot;
use crate::driver::{Driver, DriverError, DriverEvent};
use crate::render::QrRenderer;

/// Delay between a successful logout and the next initialize, giving the
/// driver time to finish its own teardown.
pub const LOGOUT_REINIT_GRACE: Duration = Duration::from_millis(500);

/// Result of an [`SessionMachine::initialize`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// Another initialize was already in flight; nothing was started.
    Coalesced,
    /// The driver accepted the initialize request.
    Completed,
    /// The driver failed; the error was logged.
    Failed,
}

/// Handle to the single session. Cheap to clone.
#[derive(Clone)]
pub struct SessionMachine {
    inner: Arc<Inner>,
}

struct Inner {
    state: watch::Sender<SessionSnapshot>,
    driver: Arc<dyn Driver>,
    renderer: QrRenderer,
}

/// Releases the initialize slot however the initialize future ends.
struct InitializingGuard<'a> {
    state: &'a watch::Sender<SessionSnapshot>,
}

impl Drop for InitializingGuard<'_> {
    fn drop(&mut self) {
        self.state.send_modify(SessionSnapshot::end_initialize);
    }
}

impl SessionMachine {
    pub fn new(driver: Arc<dyn Driver>, renderer: QrRenderer) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                state,
                driver,
                renderer,
            }),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn driver(&self) -> Arc<dyn Driver> {
        self.inner.driver.clone()
    }

    /// Start the driver unless an initialize is already in flight.
    ///
    /// Driver failures are logged and reported as [`InitOutcome::Failed`];
    /// they never propagate.
    pub async fn initialize(&self) -> InitOutcome {
        let claimed = self
            .inner
            .state
            .send_if_modified(SessionSnapshot::try_begin_initialize);
        if !claimed {
            debug!("Initialize already in flight, coalescing");
            return InitOutcome::Coalesced;
        }
        let _slot = InitializingGuard {
            state: &self.inner.state,
        };

        info!("Initializing messaging driver");
        match self.inner.driver.initialize().await {
            Ok(()) => {
                info!("Driver initialize completed");
                InitOutcome::Completed
            }
            Err(e) => {
                error!(error = %e, "Driver initialize failed");
                InitOutcome::Failed
            }
        }
    }

    /// Run [`initialize`](Self::initialize) on its own task after `delay`.
    ///
    /// The caller is never blocked and never sees a failure; a panic in the
    /// task is caught and logged.
    pub fn spawn_initialize(&self, delay: Duration) -> JoinHandle<()> {
        let machine = self.clone();
        let task = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            machine.initialize().await
        });

        tokio::spawn(async move {
            match task.await {
                Ok(InitOutcome::Failed) => warn!("Re-initialization attempt failed"),
                Ok(outcome) => debug!(?outcome, "Re-initialization attempt finished"),
                Err(e) => error!(error = %e, "Re-initialization task panicked"),
            }
        })
    }

    /// Apply a single driver event.
    pub async fn apply(&self, event: DriverEvent) {
        match event {
            DriverEvent::PairingCode { code } => self.on_pairing_code(code).await,
            DriverEvent::Authenticated => {
                self.inner
                    .state
                    .send_modify(SessionSnapshot::authenticated_by_driver);
                info!("Session authenticated");
            }
            DriverEvent::Ready => {
                self.inner.state.send_modify(SessionSnapshot::ready);
                info!("Session ready");
            }
            DriverEvent::Disconnected { reason } => {
                self.inner.state.send_modify(SessionSnapshot::disconnected);
                warn!(reason = %reason, "Session disconnected, requesting a fresh pairing code");
                self.spawn_initialize(Duration::ZERO);
            }
        }
    }

    async fn on_pairing_code(&self, code: String) {
        let renderer = self.inner.renderer;
        let issued_at = Utc::now();
        let rendered = tokio::task::spawn_blocking(move || {
            PairingArtifact::render(code, &renderer, issued_at)
        })
        .await;

        let artifact = match rendered {
            Ok(Ok(artifact)) => Some(Arc::new(artifact)),
            Ok(Err(e)) => {
                error!(error = %e, "Failed to render pairing code");
                None
            }
            Err(e) => {
                error!(error = %e, "Pairing code render task failed");
                None
            }
        };
        let available = artifact.is_some();

        let mut was_authenticated = false;
        self.inner.state.send_modify(|state| {
            was_authenticated = state.authenticated();
            state.pairing_issued(artifact);
        });

        if available {
            info!(was_authenticated, "Pairing code issued, ready to scan");
        }
    }

    /// Log the session out through the driver.
    ///
    /// On success the session is cleared immediately and a new initialize is
    /// scheduled after [`LOGOUT_REINIT_GRACE`]. On failure nothing changes.
    pub async fn logout(&self) -> Result<(), DriverError> {
        self.inner.driver.logout().await?;
        self.inner.state.send_modify(SessionSnapshot::logged_out);
        info!("Session logged out");
        self.spawn_initialize(LOGOUT_REINIT_GRACE);
        Ok(())
    }

    /// Consume driver events in order until the channel closes or `shutdown`
    /// fires.
    pub fn spawn_event_loop(
        &self,
        mut events: mpsc::Receiver<DriverEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let machine = self.clone();
        tokio::spawn(async move {
            debug!("Session event loop started");
            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some(event) = event else {
                            debug!("Driver event channel closed");
                            break;
                        };
                        debug!(event = event.kind(), "Applying driver event");
                        machine.apply(event).await;
                        debug!(phase = %machine.snapshot().phase(), "Session state updated");
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Session event loop cancelled");
                        break;
                    }
                }
            }
            debug!("Session event loop stopped");
        })
    }
}
