//! Subscription and identity provider contracts.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;

/// Entitlements of the current customer, as reported by the subscription
/// provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementSnapshot {
    /// The provider's identifier for this customer.
    pub original_app_user_id: String,
    /// Names of the active entitlements.
    #[serde(default)]
    pub active: BTreeSet<String>,
}

impl EntitlementSnapshot {
    pub fn new(user_id: impl Into<String>, active: impl IntoIterator<Item = String>) -> Self {
        Self {
            original_app_user_id: user_id.into(),
            active: active.into_iter().collect(),
        }
    }

    pub fn is_active(&self, entitlement: &str) -> bool {
        self.active.contains(entitlement)
    }
}

/// External subscription/entitlement provider.
#[async_trait]
pub trait SubscriptionProvider: Send + Sync {
    /// Associate the provider's customer with a registry identifier.
    async fn log_in(&self, user_id: &str) -> Result<()>;

    /// Current entitlements.
    async fn customer_info(&self) -> Result<EntitlementSnapshot>;

    /// Buy a package and return the resulting entitlements.
    async fn purchase_package(&self, package: &str) -> Result<EntitlementSnapshot>;
}

/// Source of this device's identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Stable per-device fingerprint.
    async fn fingerprint(&self) -> Result<String>;

    /// Human-friendly device name, used as the default peer name.
    fn device_name(&self) -> Option<String> {
        None
    }
}
