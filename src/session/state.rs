//! Session State
//!
//! Record of the live shell behind a `SessionManager`: pid, working directory,
//! shell path and terminal dimensions. Only the manager mutates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::pty::Dimensions;

/// Lifecycle of a session's shell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Not started, or spawning
    #[default]
    Starting,
    /// Shell is alive
    Running,
    /// Shell exited on its own
    Exited,
    /// Shell was killed by `stop`
    Stopped,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: String,
    /// Cleared when the shell exits
    pub pid: Option<u32>,
    pub cwd: PathBuf,
    pub shell: PathBuf,
    pub dimensions: Dimensions,
    pub status: SessionStatus,
    pub exit_code: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl SessionState {
    pub fn new(id: impl Into<String>, shell: PathBuf, cwd: PathBuf, dimensions: Dimensions) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            pid: None,
            cwd,
            shell,
            dimensions,
            status: SessionStatus::Starting,
            exit_code: None,
            created_at: now,
            last_activity: now,
        }
    }

    /// Update status, returning the previous one
    pub fn set_status(&mut self, status: SessionStatus) -> SessionStatus {
        let old = self.status;
        self.status = status;
        self.touch();
        old
    }

    pub fn set_running(&mut self, pid: Option<u32>) -> SessionStatus {
        self.pid = pid;
        self.exit_code = None;
        self.set_status(SessionStatus::Running)
    }

    pub fn set_exited(&mut self, code: u32) -> SessionStatus {
        self.pid = None;
        self.exit_code = Some(code);
        self.set_status(SessionStatus::Exited)
    }

    pub fn set_stopped(&mut self) -> SessionStatus {
        self.pid = None;
        self.set_status(SessionStatus::Stopped)
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Can accept commands
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Running
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, SessionStatus::Exited | SessionStatus::Stopped)
    }

    pub fn duration_secs(&self) -> i64 {
        (self.last_activity - self.created_at).num_seconds()
    }
}

/// Serializable snapshot of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub pid: Option<u32>,
    pub cwd: String,
    pub shell: String,
    pub dimensions: Dimensions,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<u32>,
    pub created_at: String,
    pub last_activity: String,
    pub duration_secs: i64,
}

impl From<&SessionState> for SessionInfo {
    fn from(state: &SessionState) -> Self {
        Self {
            id: state.id.clone(),
            pid: state.pid,
            cwd: state.cwd.display().to_string(),
            shell: state.shell.display().to_string(),
            dimensions: state.dimensions,
            status: state.status,
            exit_code: state.exit_code,
            created_at: state.created_at.to_rfc3339(),
            last_activity: state.last_activity.to_rfc3339(),
            duration_secs: state.duration_secs(),
        }
    }
}
