//! Scripted in-memory driver for tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{ChatId, Driver, DriverError};

#[derive(Debug, Clone)]
pub(crate) enum SendBehavior {
    Succeed,
    Fail(String),
    /// Never settles.
    Hang,
}

pub(crate) struct ScriptedDriver {
    send_behavior: Mutex<SendBehavior>,
    init_delay: Duration,
    init_fails: AtomicBool,
    logout_fails: AtomicBool,
    init_calls: AtomicUsize,
    inits_in_flight: AtomicUsize,
    max_inits_in_flight: AtomicUsize,
    logout_calls: AtomicUsize,
    sent: Mutex<Vec<(String, String)>>,
}

impl ScriptedDriver {
    pub(crate) fn new() -> Self {
        Self {
            send_behavior: Mutex::new(SendBehavior::Succeed),
            init_delay: Duration::ZERO,
            init_fails: AtomicBool::new(false),
            logout_fails: AtomicBool::new(false),
            init_calls: AtomicUsize::new(0),
            inits_in_flight: AtomicUsize::new(0),
            max_inits_in_flight: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub(crate) fn set_send_behavior(&self, behavior: SendBehavior) {
        *self.send_behavior.lock().unwrap() = behavior;
    }

    pub(crate) fn set_init_fails(&self, fails: bool) {
        self.init_fails.store(fails, Ordering::SeqCst);
    }

    pub(crate) fn set_logout_fails(&self, fails: bool) {
        self.logout_fails.store(fails, Ordering::SeqCst);
    }

    pub(crate) fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_inits_in_flight(&self) -> usize {
        self.max_inits_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    /// `(chat_id, body)` of every send attempt that reached the driver.
    pub(crate) fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn initialize(&self) -> Result<(), DriverError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.inits_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inits_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }

        self.inits_in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.init_fails.load(Ordering::SeqCst) {
            return Err(DriverError::Rejected("browser failed to launch".to_string()));
        }
        Ok(())
    }

    async fn send_message(&self, chat_id: &ChatId, body: &str) -> Result<(), DriverError> {
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.to_string(), body.to_string()));

        let behavior = self.send_behavior.lock().unwrap().clone();
        match behavior {
            SendBehavior::Succeed => Ok(()),
            SendBehavior::Fail(message) => Err(DriverError::Rejected(message)),
            SendBehavior::Hang => std::future::pending().await,
        }
    }

    async fn logout(&self) -> Result<(), DriverError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.logout_fails.load(Ordering::SeqCst) {
            return Err(DriverError::Rejected("logout failed".to_string()));
        }
        Ok(())
    }
}
