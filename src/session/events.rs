//! Session Events
//!
//! Lifecycle notifications broadcast by a `SessionManager`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::state::SessionStatus;
use crate::protocol::CommandResult;
use crate::pty::Dimensions;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    StatusChanged {
        session_id: String,
        old_status: SessionStatus,
        new_status: SessionStatus,
    },

    /// Raw PTY output, including injected markers and echoes
    Output { session_id: String, data: Bytes },

    Exited { session_id: String, exit_code: u32 },

    Resized {
        session_id: String,
        dimensions: Dimensions,
    },

    CommandStarted { session_id: String, command: String },

    CommandCompleted {
        session_id: String,
        result: CommandResult,
    },

    CommandTimedOut {
        session_id: String,
        command: String,
        timeout_ms: u64,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::StatusChanged { session_id, .. } => session_id,
            Self::Output { session_id, .. } => session_id,
            Self::Exited { session_id, .. } => session_id,
            Self::Resized { session_id, .. } => session_id,
            Self::CommandStarted { session_id, .. } => session_id,
            Self::CommandCompleted { session_id, .. } => session_id,
            Self::CommandTimedOut { session_id, .. } => session_id,
        }
    }

    /// Session-scoped event name, e.g. `session-output:<id>`
    pub fn event_name(&self) -> String {
        format!("{}:{}", self.global_event_name(), self.session_id())
    }

    pub fn global_event_name(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "session-status",
            Self::Output { .. } => "session-output",
            Self::Exited { .. } => "session-exited",
            Self::Resized { .. } => "session-resized",
            Self::CommandStarted { .. } => "command-started",
            Self::CommandCompleted { .. } => "command-completed",
            Self::CommandTimedOut { .. } => "command-timed-out",
        }
    }
}
