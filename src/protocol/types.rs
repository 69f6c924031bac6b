//! Protocol Types
//!
//! Requests and results of the command/response protocol.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result of a command that reached a terminal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    /// Command text as submitted
    pub command: String,
    /// Output with echo, marker and control sequences removed
    pub output: String,
    /// Exit status; only meaningful when `error` is absent
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl CommandResult {
    /// Ran to completion with a zero exit status
    pub fn success(&self) -> bool {
        self.error.is_none() && self.exit_code == 0
    }
}

/// A request to run one command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOptions {
    pub command: String,
    /// Run in this directory instead of the session's
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Overrides the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ExecuteOptions {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

impl From<&str> for ExecuteOptions {
    fn from(command: &str) -> Self {
        Self::new(command)
    }
}

impl From<String> for ExecuteOptions {
    fn from(command: String) -> Self {
        Self::new(command)
    }
}

/// States of the completion protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolState {
    /// No command in flight
    Idle,
    /// Marker injected, scanning output
    AwaitingCompletion,
    /// Marker found
    Resolved,
    /// Deadline passed first
    TimedOut,
    /// Write failed or the shell exited first
    Errored,
}

impl Default for ProtocolState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingCompletion => write!(f, "awaiting_completion"),
            Self::Resolved => write!(f, "resolved"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Errored => write!(f, "errored"),
        }
    }
}
