//! Single-shot timer guarding registration.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// A restartable single-shot timer.
///
/// Clones share the same timer, so the registration flow can arm it and the
/// subscription gate can cancel it.
#[derive(Clone, Default)]
pub struct Watchdog {
    armed: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.armed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm the timer, replacing any armed one. `on_timeout` runs if the timer
    /// is not stopped within `timeout`.
    pub fn start<F>(&self, timeout: Duration, on_timeout: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            debug!(?timeout, "Watchdog expired");
            on_timeout();
        });
        if let Some(previous) = self.slot().replace(handle) {
            previous.abort();
        }
    }

    /// Disarm the timer. Returns true if it was armed and had not fired.
    pub fn stop(&self) -> bool {
        match self.slot().take() {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot().as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("armed", &self.is_armed())
            .finish()
    }
}
