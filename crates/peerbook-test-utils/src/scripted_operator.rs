//! Operator answering prompts from a script.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use peerbook_core::error::{Error, Result};
use peerbook_core::operator::Operator;

use crate::lock;

/// Scripted operator.
///
/// Each prompt consumes one scripted answer; `None` (or running out of
/// answers) cancels the prompt. An empty answer takes the prompt's default.
#[derive(Default)]
pub struct ScriptedOperator {
    answers: Mutex<VecDeque<Option<String>>>,
    prompts: Mutex<Vec<String>>,
    lines: Mutex<Vec<String>>,
    restores: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedOperator {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(|a| a.map(Into::into)).collect()),
            ..Default::default()
        }
    }

    /// Wait `delay` before answering each prompt.
    pub fn with_answer_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Append an answer.
    pub fn push_answer(&self, answer: Option<&str>) {
        lock(&self.answers).push_back(answer.map(str::to_string));
    }

    /// Prompts asked so far.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    /// Lines written so far.
    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }

    /// True if any written line contains `needle`.
    pub fn wrote(&self, needle: &str) -> bool {
        lock(&self.lines).iter().any(|l| l.contains(needle))
    }

    pub fn restores(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn ask_value(&self, prompt: &str, default: Option<&str>) -> Result<String> {
        lock(&self.prompts).push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let answer = lock(&self.answers).pop_front().flatten();
        match answer {
            Some(answer) if answer.is_empty() => Ok(default.unwrap_or_default().to_string()),
            Some(answer) => Ok(answer),
            None => Err(Error::Cancelled),
        }
    }

    fn write_line(&self, text: &str) {
        lock(&self.lines).push(text.to_string());
    }

    fn restore_prompt(&self) {
        self.restores.fetch_add(1, Ordering::SeqCst);
    }
}
