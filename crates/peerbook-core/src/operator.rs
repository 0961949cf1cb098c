//! Operator (human at the terminal) contract.

use async_trait::async_trait;

use crate::error::Result;

/// Interactive operator used by registration and verification.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Ask for a value. Returns [`crate::Error::Cancelled`] when the operator
    /// aborts the prompt.
    async fn ask_value(&self, prompt: &str, default: Option<&str>) -> Result<String>;

    /// Write one status line.
    fn write_line(&self, text: &str);

    /// Put the input prompt back after a flow ends.
    fn restore_prompt(&self) {}
}
