//! Fake subscription and identity providers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use peerbook_core::error::{Error, Result};
use peerbook_core::provider::{EntitlementSnapshot, IdentityProvider, SubscriptionProvider};

use crate::lock;

/// Subscription provider with a settable snapshot.
#[derive(Default)]
pub struct FakeSubscription {
    snapshot: Mutex<EntitlementSnapshot>,
    logins: Mutex<Vec<String>>,
    purchases: Mutex<Vec<String>>,
    fail_login: AtomicBool,
    fail_purchase: AtomicBool,
}

impl FakeSubscription {
    pub fn new(snapshot: EntitlementSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            ..Default::default()
        }
    }

    pub fn set_snapshot(&self, snapshot: EntitlementSnapshot) {
        *lock(&self.snapshot) = snapshot;
    }

    pub fn fail_login(&self, fail: bool) {
        self.fail_login.store(fail, Ordering::SeqCst);
    }

    pub fn fail_purchase(&self, fail: bool) {
        self.fail_purchase.store(fail, Ordering::SeqCst);
    }

    /// Identifiers passed to `log_in`, in order.
    pub fn logins(&self) -> Vec<String> {
        lock(&self.logins).clone()
    }

    /// Packages passed to `purchase_package`, in order.
    pub fn purchases(&self) -> Vec<String> {
        lock(&self.purchases).clone()
    }
}

#[async_trait]
impl SubscriptionProvider for FakeSubscription {
    async fn log_in(&self, user_id: &str) -> Result<()> {
        lock(&self.logins).push(user_id.to_string());
        if self.fail_login.load(Ordering::SeqCst) {
            return Err(Error::provider("login refused"));
        }
        Ok(())
    }

    async fn customer_info(&self) -> Result<EntitlementSnapshot> {
        Ok(lock(&self.snapshot).clone())
    }

    async fn purchase_package(&self, package: &str) -> Result<EntitlementSnapshot> {
        lock(&self.purchases).push(package.to_string());
        if self.fail_purchase.load(Ordering::SeqCst) {
            return Err(Error::provider("purchase declined"));
        }
        Ok(lock(&self.snapshot).clone())
    }
}

/// Identity provider with fixed answers.
#[derive(Debug, Clone, Default)]
pub struct FakeIdentity {
    fingerprint: Option<String>,
    device_name: Option<String>,
}

impl FakeIdentity {
    pub fn new(fingerprint: &str) -> Self {
        Self {
            fingerprint: Some(fingerprint.to_string()),
            device_name: None,
        }
    }

    /// An identity whose fingerprint lookup fails.
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn with_device_name(mut self, name: &str) -> Self {
        self.device_name = Some(name.to_string());
        self
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn fingerprint(&self) -> Result<String> {
        self.fingerprint
            .clone()
            .ok_or_else(|| Error::provider("no fingerprint"))
    }

    fn device_name(&self) -> Option<String> {
        self.device_name.clone()
    }
}
