//! Inbound push channel messages.

use serde_json::Value;

use crate::constants::ERROR_CODE_THRESHOLD;
use crate::error::{Error, Result};

/// A JSON object received on the push channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage(Value);

impl PushMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map(PushMessage)
            .map_err(|e| Error::protocol(format!("malformed push message: {e}")))
    }

    /// The registry error code carried by this message, if any.
    ///
    /// Any JSON number counts, including ones written as floats.
    pub fn error_code(&self) -> Option<u64> {
        self.0
            .get("code")
            .and_then(Value::as_f64)
            .filter(|code| *code >= ERROR_CODE_THRESHOLD as f64)
            .map(|code| code as u64)
    }

    /// Borrow the payload.
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Take the payload.
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for PushMessage {
    fn from(value: Value) -> Self {
        PushMessage(value)
    }
}
