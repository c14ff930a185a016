//! Optional prose summarizer collaborator.
//!
//! The core never depends on a summary being available: every failure,
//! timeout or empty answer is treated as "no summary".

use crate::process::{call_bounded, run_bounded};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

/// Produces a short prose summary of a text chunk.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, text: &str, max_tokens: usize) -> Option<String>;
}

/// Runs an external command with the chunk on stdin and reads the summary
/// from stdout. `CONDENSE_MAX_TOKENS` tells the command the ceiling.
pub struct CommandSummarizer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSummarizer {
    /// Split `command_line` on whitespace; `None` when it is empty.
    pub fn new(command_line: &str, timeout: Duration) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            timeout,
        })
    }
}

impl Summarizer for CommandSummarizer {
    fn summarize(&self, text: &str, max_tokens: usize) -> Option<String> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("CONDENSE_MAX_TOKENS", max_tokens.to_string());
        let output = run_bounded(command, Some(text.to_string()), self.timeout)?;
        let summary = output.trim();
        (!summary.is_empty()).then(|| summary.to_string())
    }
}

/// Bounds an in-process summarizer with a timeout.
pub struct TimeoutSummarizer {
    inner: Arc<dyn Summarizer>,
    timeout: Duration,
}

impl TimeoutSummarizer {
    pub fn new(inner: Arc<dyn Summarizer>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl Summarizer for TimeoutSummarizer {
    fn summarize(&self, text: &str, max_tokens: usize) -> Option<String> {
        let inner = Arc::clone(&self.inner);
        let text = text.to_string();
        call_bounded("summarizer", self.timeout, move || inner.summarize(&text, max_tokens))
            .flatten()
            .filter(|s| !s.trim().is_empty())
    }
}
