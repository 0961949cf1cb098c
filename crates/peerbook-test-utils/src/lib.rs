//! peerbook-test-utils: Test infrastructure for the PeerBook client.
//!
//! Provides in-memory stand-ins for every external collaborator:
//! - FakeSessionFactory / FakeSession: session transport with scripted admin replies
//! - FakePushConnector / FakePushSocket: push socket driven by hand
//! - FakeSubscription / FakeIdentity: subscription and identity providers
//! - ScriptedOperator: operator answering prompts from a script
//! - wait_until: poll a condition while the client processes events
//!
//! Fakes never emit events on their own unless built in an "auto" mode; tests
//! drive transport state explicitly.

mod fake_providers;
mod fake_push;
mod fake_session;
mod scripted_operator;

pub use fake_providers::{FakeIdentity, FakeSubscription};
pub use fake_push::{FakePushConnector, FakePushSocket, READY_ACK};
pub use fake_session::{AdminScript, FakeSession, FakeSessionFactory, Responder};
pub use scripted_operator::ScriptedOperator;

use std::sync::{Mutex, MutexGuard};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Poll `condition` until it holds, giving up after two seconds.
///
/// Returns whether the condition was met.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    condition()
}
