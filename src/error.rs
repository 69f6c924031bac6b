//! Session Error Types
//!
//! Error taxonomy shared by the PTY layer, the completion protocol and the
//! session manager.

use thiserror::Error;

/// Errors surfaced by shell sessions
#[derive(Error, Debug)]
pub enum SessionError {
    // Protocol errors
    #[error("Session not initialized: call start() first")]
    NotInitialized,

    #[error("Session busy: a command is already pending")]
    Busy,

    #[error("Command timed out after {timeout_ms}ms: {command}")]
    Timeout { command: String, timeout_ms: u64 },

    // Process errors
    #[error("Failed to spawn shell {shell} in {cwd}: {reason}")]
    SpawnFailed {
        shell: String,
        cwd: String,
        reason: String,
    },

    #[error("Shell process has exited")]
    ProcessExited,

    #[error("PTY error: {0}")]
    Pty(String),

    // Registry errors
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already exists: {0}")]
    SessionExists(String),

    #[error("Maximum sessions reached: {0}")]
    MaxSessionsReached(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Stable error code for transport layers
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::Busy => "BUSY",
            Self::Timeout { .. } => "TIMEOUT",
            Self::SpawnFailed { .. } => "SPAWN_FAILURE",
            Self::ProcessExited => "PROCESS_EXITED",
            Self::Pty(_) => "PTY_ERROR",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::SessionExists(_) => "SESSION_EXISTS",
            Self::MaxSessionsReached(_) => "MAX_SESSIONS",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Whether the session stays usable after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized
                | Self::Busy
                | Self::Timeout { .. }
                | Self::SessionNotFound(_)
                | Self::SessionExists(_)
                | Self::MaxSessionsReached(_)
        )
    }

    /// Command text carried by a timeout
    pub fn timed_out_command(&self) -> Option<&str> {
        match self {
            Self::Timeout { command, .. } => Some(command),
            _ => None,
        }
    }
}

impl From<SessionError> for String {
    fn from(err: SessionError) -> String {
        err.to_string()
    }
}

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;
