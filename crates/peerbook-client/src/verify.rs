//! One-time-code verification loop.

use tracing::{debug, warn};

use peerbook_core::constants::CMD_VERIFY;
use peerbook_core::error::Result;
use peerbook_core::operator::Operator;
use peerbook_core::protocol::check_verify_reply;

use crate::connection::PeerbookConnection;

const DEFAULT_PROMPT: &str = "Enter OTP to verify gate";

/// How a verification loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified,
    /// The operator aborted the prompt.
    Cancelled,
}

/// Prompts for one-time codes until the registry accepts one.
///
/// Rejected codes and failed submissions are retried without limit; only the
/// operator can end the loop early.
pub struct VerificationLoop<'a> {
    connection: &'a PeerbookConnection,
    operator: &'a dyn Operator,
}

impl<'a> VerificationLoop<'a> {
    pub fn new(connection: &'a PeerbookConnection, operator: &'a dyn Operator) -> Self {
        Self {
            connection,
            operator,
        }
    }

    /// Verify `fingerprint`, prompting with `prompt` or a default.
    ///
    /// Fails only when a session cannot be established or the operator
    /// collaborator itself fails.
    pub async fn run(&self, fingerprint: &str, prompt: Option<&str>) -> Result<Verification> {
        let prompt = prompt.unwrap_or(DEFAULT_PROMPT);
        let mut attempts = 0u32;
        loop {
            let otp = match self.operator.ask_value(prompt, None).await {
                Ok(otp) => otp,
                Err(e) if e.is_silent() => {
                    debug!(attempts, "Verification cancelled");
                    return Ok(Verification::Cancelled);
                }
                Err(e) => return Err(e),
            };

            self.connection.ensure_session().await?;
            attempts += 1;
            let reply = match self
                .connection
                .admin_command(CMD_VERIFY, &[fingerprint, otp.trim()])
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(error = %e, attempts, "Verify command failed");
                    self.operator.write_line("Failed to verify, please try again");
                    continue;
                }
            };

            match check_verify_reply(&reply) {
                Ok(()) => {
                    debug!(attempts, "Fingerprint verified");
                    return Ok(Verification::Verified);
                }
                Err(_) => self.operator.write_line("Invalid OTP, please try again"),
            }
        }
    }
}
