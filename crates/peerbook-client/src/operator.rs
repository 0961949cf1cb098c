//! Readline-backed operator for terminal use.

use std::io::Write;

use async_trait::async_trait;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use peerbook_core::error::{Error, Result};
use peerbook_core::operator::Operator;

/// Operator reading answers from the controlling terminal.
///
/// Ctrl-C and Ctrl-D cancel the prompt.
#[derive(Debug, Clone)]
pub struct TerminalOperator {
    prompt: String,
}

impl Default for TerminalOperator {
    fn default() -> Self {
        Self::new("peerbook> ")
    }
}

impl TerminalOperator {
    /// Create an operator that shows `prompt` when a flow ends.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

fn read_value(prompt: &str, default: &str) -> Result<String> {
    let mut rl = DefaultEditor::new().map_err(|e| Error::Transport {
        message: format!("failed to create readline: {}", e),
    })?;
    match rl.readline_with_initial(prompt, (default, "")) {
        Ok(line) => Ok(line.trim().to_string()),
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Err(Error::Cancelled),
        Err(ReadlineError::Io(e)) => Err(Error::Io(e)),
        Err(e) => Err(Error::Transport {
            message: format!("readline failed: {}", e),
        }),
    }
}

#[async_trait]
impl Operator for TerminalOperator {
    async fn ask_value(&self, prompt: &str, default: Option<&str>) -> Result<String> {
        let prompt = format!("{}: ", prompt);
        let default = default.unwrap_or_default().to_string();
        tokio::task::spawn_blocking(move || read_value(&prompt, &default))
            .await
            .map_err(|e| Error::Transport {
                message: format!("prompt task failed: {}", e),
            })?
    }

    fn write_line(&self, text: &str) {
        println!("{}", text);
    }

    fn restore_prompt(&self) {
        print!("{}", self.prompt);
        let _ = std::io::stdout().flush();
    }
}
