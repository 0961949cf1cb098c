//! Admin command payloads.
//!
//! Every admin command runs on its own logical channel: the request is the
//! command tokens plus fixed channel parameters, the reply is whatever the
//! registry writes before closing the channel.

use serde::Deserialize;

use crate::constants::{ADMIN_CHANNEL_COLS, ADMIN_CHANNEL_PRIORITY, ADMIN_CHANNEL_ROWS};
use crate::error::{Error, Result};

/// Parameters for opening one logical channel on the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Command name followed by its arguments.
    pub command: Vec<String>,
    /// Channel priority.
    pub priority: u8,
    /// Virtual terminal columns.
    pub cols: u16,
    /// Virtual terminal rows.
    pub rows: u16,
}

impl ChannelRequest {
    /// Request for an admin command with the default channel parameters.
    pub fn admin(command: &str, args: &[&str]) -> Self {
        let mut tokens = Vec::with_capacity(args.len() + 1);
        tokens.push(command.to_string());
        tokens.extend(args.iter().map(|a| a.to_string()));
        Self {
            command: tokens,
            priority: ADMIN_CHANNEL_PRIORITY,
            cols: ADMIN_CHANNEL_COLS,
            rows: ADMIN_CHANNEL_ROWS,
        }
    }

    /// The command name (first token).
    pub fn name(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or_default()
    }

    /// Arguments after the command name.
    pub fn args(&self) -> &[String] {
        self.command.get(1..).unwrap_or_default()
    }
}

/// Reply of the `register` admin command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistrationReply {
    /// Pairing code to show the operator (rendered QR).
    #[serde(rename = "QR")]
    pub pairing_code: String,
    /// Identifier assigned by the registry.
    #[serde(rename = "ID")]
    pub id: String,
}

impl RegistrationReply {
    /// Parse the JSON reply.
    pub fn parse(reply: &str) -> Result<Self> {
        serde_json::from_str(reply)
            .map_err(|e| Error::protocol(format!("malformed registration reply: {e}")))
    }
}

/// Check the reply of the `verify` admin command.
///
/// The registry answers with a reply starting with `1` for an accepted code.
pub fn check_verify_reply(reply: &str) -> Result<()> {
    if reply.starts_with('1') {
        Ok(())
    } else {
        Err(Error::VerificationRejected)
    }
}
