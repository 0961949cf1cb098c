//! First-time enrollment with the registry.
//!
//! The flow is strictly sequential: collect identity details, run the
//! `register` admin command, show the pairing code, verify this device's
//! fingerprint with a one-time code, log in to the subscription provider and
//! open the push channel. Every failure ends the flow with one status line
//! for the operator; nothing is escalated further.

use std::sync::Arc;

use tracing::{info, warn};

use peerbook_core::RegistryId;
use peerbook_core::constants::CMD_REGISTER;
use peerbook_core::operator::Operator;
use peerbook_core::protocol::RegistrationReply;
use peerbook_core::provider::IdentityProvider;

use crate::connection::PeerbookConnection;
use crate::verify::{Verification, VerificationLoop};
use crate::watchdog::Watchdog;

const CANCELLED: &str = "Cancelled. Use `subscribe` to try again";
const REGISTRATION_FAILED: &str =
    "Registration failed\n    Please try again and if persists, `support`";

/// Step at which registration stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStep {
    Register,
    ParseReply,
    Fingerprint,
    Verify,
    SubscriptionLogin,
}

/// Result of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered { uid: String },
    Cancelled,
    Failed(FailedStep),
}

/// Drives enrollment of this device.
pub struct RegistrationFlow {
    connection: Arc<PeerbookConnection>,
    operator: Arc<dyn Operator>,
    identity: Arc<dyn IdentityProvider>,
    watchdog: Watchdog,
    watchdog_timeout: std::time::Duration,
}

impl RegistrationFlow {
    pub fn new(
        connection: Arc<PeerbookConnection>,
        operator: Arc<dyn Operator>,
        identity: Arc<dyn IdentityProvider>,
        watchdog: Watchdog,
        watchdog_timeout: std::time::Duration,
    ) -> Self {
        Self {
            connection,
            operator,
            identity,
            watchdog,
            watchdog_timeout,
        }
    }

    fn finish(&self, line: &str, outcome: RegistrationOutcome) -> RegistrationOutcome {
        self.watchdog.stop();
        self.operator.write_line(line);
        self.operator.restore_prompt();
        outcome
    }

    /// Run the flow to completion.
    pub async fn run(&self) -> RegistrationOutcome {
        self.operator.write_line("Registering with PeerBook");

        let device_name = self.identity.device_name();
        let peer_name = match self
            .operator
            .ask_value("Peer name", device_name.as_deref())
            .await
        {
            Ok(name) => name,
            Err(e) => {
                info!(error = %e, "Registration cancelled");
                return self.finish(CANCELLED, RegistrationOutcome::Cancelled);
            }
        };
        let email = match self.operator.ask_value("Recovery email", None).await {
            Ok(email) => email,
            Err(e) => {
                info!(error = %e, "Registration cancelled");
                return self.finish(CANCELLED, RegistrationOutcome::Cancelled);
            }
        };

        let reply = match self
            .connection
            .admin_command(CMD_REGISTER, &[email.as_str(), peer_name.as_str()])
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Register command failed");
                return self.finish(
                    REGISTRATION_FAILED,
                    RegistrationOutcome::Failed(FailedStep::Register),
                );
            }
        };
        let reply = match RegistrationReply::parse(&reply) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Bad registration reply");
                return self.finish(
                    REGISTRATION_FAILED,
                    RegistrationOutcome::Failed(FailedStep::ParseReply),
                );
            }
        };
        let uid = reply.id;
        self.connection.set_registry_id(RegistryId::from_raw(&uid));

        self.operator
            .write_line("Please scan this QR code with your OTP app");
        self.operator.write_line(&reply.pairing_code);
        self.operator.write_line("");
        self.operator
            .write_line("and use it to generate a One Time Password");

        let operator = Arc::clone(&self.operator);
        self.watchdog.start(self.watchdog_timeout, move || {
            operator.write_line("Timed out waiting for OTP");
            operator.restore_prompt();
        });

        let fingerprint = match self.identity.fingerprint().await {
            Ok(fp) => fp,
            Err(e) => {
                warn!(error = %e, "Failed to get fingerprint");
                return self.finish(
                    "Failed to get fingerprint",
                    RegistrationOutcome::Failed(FailedStep::Fingerprint),
                );
            }
        };

        let verification = VerificationLoop::new(&self.connection, self.operator.as_ref())
            .run(&fingerprint, Some("OTP"))
            .await;
        self.watchdog.stop();
        match verification {
            Ok(Verification::Verified) => {}
            Ok(Verification::Cancelled) => {
                return self.finish(CANCELLED, RegistrationOutcome::Cancelled);
            }
            Err(e) => {
                warn!(error = %e, "Error verifying OTP");
                return self.finish(
                    "Failed to verify OTP",
                    RegistrationOutcome::Failed(FailedStep::Verify),
                );
            }
        }

        if let Err(e) = self.connection.subscription().log_in(&uid).await {
            warn!(error = %e, uid = %uid, "Subscription login failed");
            return self.finish(
                "Failed to log in to the subscription service",
                RegistrationOutcome::Failed(FailedStep::SubscriptionLogin),
            );
        }
        self.operator
            .write_line("Validated! Use `install` to install on a server");
        info!(uid = %uid, "Registered with PeerBook");

        if let Err(e) = self.connection.connect_push().await {
            warn!(error = %e, "Failed to connect to PeerBook");
            self.operator.write_line("Failed to connect to PeerBook");
        }
        self.operator.restore_prompt();
        RegistrationOutcome::Registered { uid }
    }
}
