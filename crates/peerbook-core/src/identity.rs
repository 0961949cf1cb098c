//! Registry-assigned device identifier.

use std::fmt;

use tracing::warn;

use crate::constants::UNREGISTERED_ID;
use crate::error::{Error, Result};

/// The identifier the registry assigned to this device.
///
/// Three states are distinguished: nothing known yet, the registry's
/// "not yet registered" sentinel, and a confirmed identifier. A confirmed
/// identifier only changes through [`RegistryId::reset`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RegistryId {
    /// Not queried yet.
    #[default]
    Unset,
    /// The registry answered with its sentinel: this device is not paired.
    Unregistered,
    /// Confirmed identifier.
    Confirmed(String),
}

impl RegistryId {
    /// Parse the reply of the `ping` admin command.
    pub fn from_ping_reply(reply: &str) -> Result<Self> {
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(Error::protocol("empty identifier reply"));
        }
        Ok(Self::from_raw(reply))
    }

    /// Interpret a raw identifier string; empty means unset.
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "" => RegistryId::Unset,
            UNREGISTERED_ID => RegistryId::Unregistered,
            id => RegistryId::Confirmed(id.to_string()),
        }
    }

    /// True for the "not yet registered" sentinel.
    pub fn is_unregistered(&self) -> bool {
        matches!(self, RegistryId::Unregistered)
    }

    /// True once the registry confirmed an identifier.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, RegistryId::Confirmed(_))
    }

    /// The confirmed identifier, if any.
    pub fn as_confirmed(&self) -> Option<&str> {
        match self {
            RegistryId::Confirmed(id) => Some(id),
            _ => None,
        }
    }

    /// Record a newer answer from the registry.
    ///
    /// Returns false (and keeps the current value) when a confirmed identifier
    /// would be replaced by something else.
    pub fn update(&mut self, next: RegistryId) -> bool {
        if self.is_confirmed() {
            if next != *self {
                warn!(current = %self, next = %next, "Ignoring change of confirmed registry id");
                return false;
            }
            return true;
        }
        if next != RegistryId::Unset {
            *self = next;
        }
        true
    }

    /// Forget the identifier.
    pub fn reset(&mut self) {
        *self = RegistryId::Unset;
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryId::Unset => Ok(()),
            RegistryId::Unregistered => f.write_str(UNREGISTERED_ID),
            RegistryId::Confirmed(id) => f.write_str(id),
        }
    }
}
