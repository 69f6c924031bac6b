//! Session Management Module
//!
//! Interactive shell sessions with:
//! - One PTY-backed shell per `SessionManager`
//! - Structured command execution over the completion protocol
//! - Session-scoped lifecycle events and raw output observers
//! - Concurrent sessions keyed by id (DashMap)

pub mod events;
pub mod history;
pub mod manager;
pub mod registry;
pub mod state;

pub use events::SessionEvent;
pub use history::HistoryLog;
pub use manager::{SessionManager, StartOptions};
pub use registry::SessionRegistry;
pub use state::{SessionInfo, SessionState, SessionStatus};
