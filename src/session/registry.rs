//! Session Registry
//!
//! Lock-free map of concurrently running sessions, keyed by id.

use dashmap::DashMap;
use log::{info, warn};
use std::sync::Arc;

use super::manager::{SessionManager, StartOptions};
use super::state::SessionInfo;
use crate::config::EngineConfig;
use crate::error::{SessionError, SessionResult};
use crate::pty::{NativeSpawner, ProcessSpawner};
use crate::suggest::{NoSuggestions, SuggestionCollaborator};

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionManager>>,
    config: EngineConfig,
    spawner: Arc<dyn ProcessSpawner>,
    suggester: Arc<dyn SuggestionCollaborator>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions: config.registry.max_sessions,
            config,
            spawner: Arc::new(NativeSpawner),
            suggester: Arc::new(NoSuggestions),
        }
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn with_suggester(mut self, suggester: Arc<dyn SuggestionCollaborator>) -> Self {
        self.suggester = suggester;
        self
    }

    /// Create and start a session. Exited sessions are reclaimed when at capacity.
    pub fn create_session(
        &self,
        session_id: impl Into<String>,
        options: StartOptions,
    ) -> SessionResult<Arc<SessionManager>> {
        let session_id = session_id.into();

        if self.sessions.len() >= self.max_sessions {
            self.cleanup_exited();

            if self.sessions.len() >= self.max_sessions {
                return Err(SessionError::MaxSessionsReached(self.max_sessions));
            }
        }

        if self.sessions.contains_key(&session_id) {
            return Err(SessionError::SessionExists(session_id));
        }

        let session = Arc::new(
            SessionManager::new(&session_id, self.config.clone())
                .with_spawner(self.spawner.clone())
                .with_suggester(self.suggester.clone()),
        );
        session.start(options)?;

        // A concurrent create may have won the race for this id
        match self.sessions.entry(session_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                session.stop();
                return Err(SessionError::SessionExists(session_id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session.clone());
            }
        }

        info!("Created session: {}", session_id);
        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> SessionResult<Arc<SessionManager>> {
        self.sessions
            .get(session_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))
    }

    /// Kill a session's shell and forget it
    pub fn stop_session(&self, session_id: &str) -> SessionResult<()> {
        let (_, session) = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;

        session.stop();
        info!("Removed session: {}", session_id);
        Ok(())
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions.iter().filter_map(|s| s.value().info()).collect()
    }

    /// Forget sessions whose shell is gone. Returns how many were removed.
    pub fn cleanup_exited(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.is_running());
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            info!("Cleaned up {} exited session(s)", removed);
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Stop every session, for host shutdown
    pub fn shutdown_all(&self) {
        info!("Shutting down all sessions...");

        let ids: Vec<String> = self.sessions.iter().map(|s| s.key().clone()).collect();
        for id in ids {
            if let Err(e) = self.stop_session(&id) {
                warn!("Error stopping session {}: {}", id, e);
            }
        }

        info!("All sessions shut down");
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}
