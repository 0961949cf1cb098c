//! Entitlement-driven connection gating.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use peerbook_core::ClientConfig;
use peerbook_core::error::Result;
use peerbook_core::provider::EntitlementSnapshot;

use crate::connection::PeerbookConnection;
use crate::watchdog::Watchdog;

/// What the gate did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    /// Another notification was still being processed.
    Ignored,
    /// The entitlement is inactive; the connection was closed.
    Closed,
    Connected,
    /// The entitlement is active but connecting failed. `retryable` is set
    /// when a later attempt may succeed without operator action.
    ConnectFailed { retryable: bool },
}

/// Clears the busy flag when processing ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Starts and stops the connection as entitlements change.
pub struct SubscriptionGate {
    connection: Arc<PeerbookConnection>,
    watchdog: Watchdog,
    entitlement: String,
    busy: AtomicBool,
}

impl SubscriptionGate {
    pub fn new(
        connection: Arc<PeerbookConnection>,
        watchdog: Watchdog,
        entitlement: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            watchdog,
            entitlement: entitlement.into(),
            busy: AtomicBool::new(false),
        }
    }

    /// Gate on the entitlement named in `config`.
    pub fn from_config(
        connection: Arc<PeerbookConnection>,
        watchdog: Watchdog,
        config: &ClientConfig,
    ) -> Self {
        Self::new(connection, watchdog, config.entitlement.clone())
    }

    /// Handle an entitlement snapshot from the subscription provider.
    ///
    /// Connect failures are logged and reported as
    /// [`GateAction::ConnectFailed`], never returned as errors.
    pub async fn on_entitlements(&self, snapshot: &EntitlementSnapshot) -> GateAction {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Entitlement update while another is processed, ignoring");
            return GateAction::Ignored;
        }
        let _guard = BusyGuard(&self.busy);

        if !snapshot.is_active(&self.entitlement) {
            info!(entitlement = %self.entitlement, "Entitlement inactive, closing connection");
            self.connection.close();
            return GateAction::Closed;
        }

        self.watchdog.stop();
        let uid = snapshot.original_app_user_id.as_str();
        info!(uid, "Subscribed to PeerBook");
        match self.connection.connect(Some(uid)).await {
            Ok(()) => GateAction::Connected,
            Err(e) => {
                if e.is_fatal() {
                    info!(error = %e, "Not connecting until the device is set up");
                } else {
                    warn!(error = %e, "Failed to connect");
                }
                GateAction::ConnectFailed {
                    retryable: e.is_transient(),
                }
            }
        }
    }

    /// Fetch current entitlements and act on them.
    pub async fn refresh(&self) -> Result<GateAction> {
        let snapshot = self.connection.subscription().customer_info().await?;
        Ok(self.on_entitlements(&snapshot).await)
    }

    /// Purchase `package` and act on the resulting entitlements.
    pub async fn purchase(&self, package: &str) -> Result<GateAction> {
        let snapshot = self
            .connection
            .subscription()
            .purchase_package(package)
            .await
            .inspect_err(|e| warn!(error = %e, package, "Purchase failed"))?;
        Ok(self.on_entitlements(&snapshot).await)
    }
}
