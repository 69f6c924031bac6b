//! Session Manager
//!
//! Owns one shell session: the PTY process, its state record, the completion
//! protocol and the command history. Raw output and exit notifications are
//! re-broadcast to passive observers; structured command results come only
//! from `execute_command`.

use bytes::Bytes;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::events::SessionEvent;
use super::history::HistoryLog;
use super::state::{SessionInfo, SessionState, SessionStatus};
use crate::config::{default_shell, EngineConfig};
use crate::error::{SessionError, SessionResult};
use crate::protocol::{CommandResult, CompletionProtocol, ExecuteOptions, ProtocolState, ShellDialect};
use crate::pty::{Dimensions, NativeSpawner, ProcessSpawner, PtyProcess, SpawnOptions, Subscribers, Subscription};
use crate::suggest::{NoSuggestions, SuggestionCollaborator, SuggestionContext};

/// Capacity of the lifecycle event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Overrides for `start`; anything unset falls back to the session config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOptions {
    pub shell: Option<String>,
    pub args: Option<Vec<String>>,
    pub cwd: Option<PathBuf>,
    pub rows: Option<u16>,
    pub cols: Option<u16>,
    /// Merged over the configured environment
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl StartOptions {
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_size(mut self, rows: u16, cols: u16) -> Self {
        self.rows = Some(rows);
        self.cols = Some(cols);
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = Some(args);
        self
    }
}

/// The live process plus the subscriptions that feed the manager
struct LiveProcess {
    process: Arc<dyn PtyProcess>,
    dialect: ShellDialect,
    subscriptions: Vec<Subscription>,
}

pub struct SessionManager {
    id: String,
    config: EngineConfig,
    spawner: Arc<dyn ProcessSpawner>,
    suggester: Arc<dyn SuggestionCollaborator>,
    protocol: CompletionProtocol,
    history: HistoryLog,
    state: Arc<RwLock<Option<SessionState>>>,
    live: Mutex<Option<LiveProcess>>,
    event_tx: broadcast::Sender<SessionEvent>,
    output_observers: Arc<Subscribers<Bytes>>,
    exit_observers: Arc<Subscribers<u32>>,
}

impl SessionManager {
    pub fn new(id: impl Into<String>, config: EngineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            id: id.into(),
            protocol: CompletionProtocol::new(&config.command),
            history: HistoryLog::new(config.history.limit),
            config,
            spawner: Arc::new(NativeSpawner),
            suggester: Arc::new(NoSuggestions),
            state: Arc::new(RwLock::new(None)),
            live: Mutex::new(None),
            event_tx,
            output_observers: Arc::new(Subscribers::new()),
            exit_observers: Arc::new(Subscribers::new()),
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

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Spawn the shell, replacing any live one
    pub fn start(&self, options: StartOptions) -> SessionResult<SessionInfo> {
        self.teardown();

        let session = &self.config.session;
        let shell = resolve_shell(
            options
                .shell
                .or_else(|| session.shell.clone())
                .unwrap_or_else(default_shell),
        );
        let cwd = match options.cwd.or_else(|| session.cwd.clone()) {
            Some(cwd) => cwd,
            None => std::env::current_dir()?,
        };
        let dimensions = Dimensions::new(
            options.rows.unwrap_or(session.rows),
            options.cols.unwrap_or(session.cols),
        );

        let mut env = session.env.clone();
        env.entry("TERM".to_string()).or_insert_with(|| session.term.clone());
        env.extend(options.env);

        let spawn_options = SpawnOptions {
            shell: shell.clone(),
            args: options.args.unwrap_or_else(|| session.args.clone()),
            cwd: cwd.clone(),
            env,
            dimensions,
        };

        let process = match self.spawner.spawn(&spawn_options) {
            Ok(process) => process,
            Err(e) => {
                error!(
                    "Failed to start session {} with shell {} in {}: {}",
                    self.id,
                    shell.display(),
                    cwd.display(),
                    e
                );
                return Err(e);
            }
        };

        let mut state = SessionState::new(&self.id, shell.clone(), cwd, dimensions);
        let old_status = state.set_running(process.pid());
        let info = SessionInfo::from(&state);
        *self.state.write() = Some(state);
        self.emit(SessionEvent::StatusChanged {
            session_id: self.id.clone(),
            old_status,
            new_status: SessionStatus::Running,
        });

        // Subscribed after the state exists so an immediate exit is recorded
        let subscriptions = vec![self.forward_output(process.as_ref()), self.watch_exit(process.as_ref())];

        *self.live.lock() = Some(LiveProcess {
            process,
            dialect: ShellDialect::detect(&shell),
            subscriptions,
        });

        info!("Started session {} (pid {:?})", self.id, info.pid);
        Ok(info)
    }

    fn forward_output(&self, process: &dyn PtyProcess) -> Subscription {
        let session_id = self.id.clone();
        let event_tx = self.event_tx.clone();
        let observers = self.output_observers.clone();

        process.subscribe_output(Box::new(move |chunk: &Bytes| {
            let _ = event_tx.send(SessionEvent::Output {
                session_id: session_id.clone(),
                data: chunk.clone(),
            });
            observers.emit(chunk);
        }))
    }

    fn watch_exit(&self, process: &dyn PtyProcess) -> Subscription {
        let session_id = self.id.clone();
        let event_tx = self.event_tx.clone();
        let observers = self.exit_observers.clone();
        let state = self.state.clone();

        process.subscribe_exit(Box::new(move |code: &u32| {
            info!("Shell for session {} exited with code {}", session_id, code);

            let old_status = state.write().as_mut().map(|s| s.set_exited(*code));
            if let Some(old_status) = old_status {
                let _ = event_tx.send(SessionEvent::StatusChanged {
                    session_id: session_id.clone(),
                    old_status,
                    new_status: SessionStatus::Exited,
                });
            }
            let _ = event_tx.send(SessionEvent::Exited {
                session_id: session_id.clone(),
                exit_code: *code,
            });
            observers.emit(code);
        }))
    }

    /// Dispose subscriptions, then kill. Returns whether a process was live.
    fn teardown(&self) -> bool {
        let live = self.live.lock().take();
        match live {
            Some(LiveProcess {
                process,
                subscriptions,
                ..
            }) => {
                drop(subscriptions);
                process.kill();
                debug!("Tore down shell {:?} of session {}", process.pid(), self.id);
                true
            }
            None => false,
        }
    }

    /// Kill the shell; the session can be started again
    pub fn stop(&self) {
        if !self.teardown() {
            return;
        }

        let old_status = self.state.write().as_mut().map(|s| s.set_stopped());
        if let Some(old_status) = old_status {
            self.emit(SessionEvent::StatusChanged {
                session_id: self.id.clone(),
                old_status,
                new_status: SessionStatus::Stopped,
            });
        }
        info!("Stopped session {}", self.id);
    }

    /// Resize the terminal; a no-op before `start` and after the shell exits
    pub fn resize(&self, rows: u16, cols: u16) -> SessionResult<()> {
        let Some(process) = self.process() else {
            debug!("Ignoring resize of session {} before start", self.id);
            return Ok(());
        };
        if !process.is_alive() {
            debug!("Ignoring resize of session {} after its shell exited", self.id);
            return Ok(());
        }

        let dimensions = Dimensions::new(rows, cols);
        process.resize(dimensions)?;

        if let Some(state) = self.state.write().as_mut() {
            state.dimensions = dimensions;
            state.touch();
        }
        self.emit(SessionEvent::Resized {
            session_id: self.id.clone(),
            dimensions,
        });
        Ok(())
    }

    /// Run one command and wait for its result
    pub async fn execute_command(&self, options: impl Into<ExecuteOptions>) -> SessionResult<CommandResult> {
        let options = options.into();
        let (process, dialect) = {
            let live = self.live.lock();
            let live = live.as_ref().ok_or(SessionError::NotInitialized)?;
            (live.process.clone(), live.dialect)
        };
        if self.protocol.is_busy() {
            return Err(SessionError::Busy);
        }

        let timeout = Duration::from_millis(options.timeout_ms.unwrap_or(self.config.command.timeout_ms));
        self.emit(SessionEvent::CommandStarted {
            session_id: self.id.clone(),
            command: options.command.clone(),
        });

        let result = self
            .protocol
            .execute(
                process.as_ref(),
                &self.history,
                dialect,
                &options.command,
                options.cwd.as_deref(),
                timeout,
            )
            .await;

        match &result {
            Ok(result) => self.emit(SessionEvent::CommandCompleted {
                session_id: self.id.clone(),
                result: result.clone(),
            }),
            Err(SessionError::Timeout { command, timeout_ms }) => self.emit(SessionEvent::CommandTimedOut {
                session_id: self.id.clone(),
                command: command.clone(),
                timeout_ms: *timeout_ms,
            }),
            Err(_) => {}
        }
        if let Some(state) = self.state.write().as_mut() {
            state.touch();
        }

        result
    }

    /// Forward raw bytes to the shell
    pub fn write(&self, data: &[u8]) -> SessionResult<()> {
        self.process().ok_or(SessionError::NotInitialized)?.write(data)
    }

    /// Candidate next commands; collaborator failures yield an empty list
    pub async fn get_suggestions(&self, partial: &str) -> Vec<String> {
        let context = SuggestionContext {
            previous_commands: self.history.recent(self.config.history.suggestion_window),
            current_directory: self
                .current_directory()
                .map(|cwd| cwd.display().to_string())
                .unwrap_or_default(),
        };
        let timeout = Duration::from_millis(self.config.suggestions.timeout_ms);

        match tokio::time::timeout(timeout, self.suggester.suggest(partial, &context)).await {
            Ok(Ok(suggestions)) => suggestions,
            Ok(Err(e)) => {
                warn!("Suggestion request failed for session {}: {:#}", self.id, e);
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "Suggestion request for session {} timed out after {}ms",
                    self.id,
                    timeout.as_millis()
                );
                Vec::new()
            }
        }
    }

    /// Lifecycle events, including raw output
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Raw output observer. Sees injected markers and echoes while commands run.
    pub fn on_output(&self, callback: impl Fn(&Bytes) + Send + Sync + 'static) -> Subscription {
        self.output_observers.subscribe(callback)
    }

    pub fn on_exit(&self, callback: impl Fn(&u32) + Send + Sync + 'static) -> Subscription {
        self.exit_observers.subscribe(callback)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn process(&self) -> Option<Arc<dyn PtyProcess>> {
        self.live.lock().as_ref().map(|live| live.process.clone())
    }

    /// Pid of the live shell; cleared once it exits
    pub fn process_id(&self) -> Option<u32> {
        self.state.read().as_ref().and_then(|s| s.pid)
    }

    pub fn current_directory(&self) -> Option<PathBuf> {
        self.state.read().as_ref().map(|s| s.cwd.clone())
    }

    pub fn current_shell(&self) -> Option<PathBuf> {
        self.state.read().as_ref().map(|s| s.shell.clone())
    }

    pub fn dimensions(&self) -> Option<Dimensions> {
        self.state.read().as_ref().map(|s| s.dimensions)
    }

    pub fn status(&self) -> SessionStatus {
        self.state.read().as_ref().map(|s| s.status).unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.state.read().as_ref().map(|s| s.is_active()).unwrap_or(false)
    }

    pub fn info(&self) -> Option<SessionInfo> {
        self.state.read().as_ref().map(SessionInfo::from)
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn protocol_state(&self) -> ProtocolState {
        self.protocol.state()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Bare names are looked up on PATH; anything with a separator is used as is
fn resolve_shell(shell: String) -> PathBuf {
    let path = Path::new(&shell);
    if path.components().count() > 1 || path.is_absolute() {
        return path.to_path_buf();
    }
    match which::which(&shell) {
        Ok(resolved) => resolved,
        Err(e) => {
            debug!("Could not resolve {} on PATH: {}", shell, e);
            PathBuf::from(shell)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::testing::FakeSpawner;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager(spawner: &Arc<FakeSpawner>) -> SessionManager {
        SessionManager::new("test", EngineConfig::default()).with_spawner(spawner.clone())
    }

    fn options() -> StartOptions {
        StartOptions::default().with_shell("/bin/bash").with_cwd("/tmp")
    }

    struct FailingSuggester;

    #[async_trait]
    impl SuggestionCollaborator for FailingSuggester {
        async fn suggest(&self, _: &str, _: &SuggestionContext) -> anyhow::Result<Vec<String>> {
            anyhow::bail!("model unavailable")
        }
    }

    struct SlowSuggester;

    #[async_trait]
    impl SuggestionCollaborator for SlowSuggester {
        async fn suggest(&self, _: &str, _: &SuggestionContext) -> anyhow::Result<Vec<String>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec!["never".to_string()])
        }
    }

    #[derive(Default)]
    struct RecordingSuggester {
        seen: Mutex<Option<SuggestionContext>>,
    }

    #[async_trait]
    impl SuggestionCollaborator for RecordingSuggester {
        async fn suggest(&self, partial: &str, context: &SuggestionContext) -> anyhow::Result<Vec<String>> {
            *self.seen.lock() = Some(context.clone());
            Ok(vec![format!("{} --help", partial)])
        }
    }

    #[tokio::test]
    async fn test_execute_before_start_is_not_initialized() {
        let spawner = Arc::new(FakeSpawner::default());
        let manager = manager(&spawner);

        let result = manager.execute_command("echo hi").await;
        assert!(matches!(result, Err(SessionError::NotInitialized)));
        assert!(manager.write(b"ls\n").is_err());
        assert!(manager.process_id().is_none());
    }

    #[tokio::test]
    async fn test_start_records_state() {
        let spawner = Arc::new(FakeSpawner::default());
        let manager = manager(&spawner);

        let info = manager.start(options().with_size(30, 100)).unwrap();

        assert_eq!(info.pid, Some(1000));
        assert_eq!(manager.process_id(), Some(1000));
        assert_eq!(manager.current_directory(), Some(PathBuf::from("/tmp")));
        assert_eq!(manager.current_shell(), Some(PathBuf::from("/bin/bash")));
        assert_eq!(manager.dimensions(), Some(Dimensions::new(30, 100)));
        assert_eq!(manager.status(), SessionStatus::Running);

        let (spawned, _) = spawner.last().unwrap();
        assert_eq!(spawned.env.get("TERM").map(String::as_str), Some("xterm-256color"));
    }

    #[tokio::test]
    async fn test_execute_and_history_order() {
        let spawner = Arc::new(FakeSpawner::default());
        let manager = manager(&spawner);
        manager.start(options()).unwrap();

        let first = manager.execute_command("echo one").await.unwrap();
        let second = manager.execute_command("false").await.unwrap();

        assert_eq!(first.output, "one");
        assert_eq!(second.exit_code, 1);
        assert_eq!(manager.history().entries(), vec!["echo one", "false"]);
    }

    #[tokio::test]
    async fn test_timeout_then_usable() {
        let spawner = Arc::new(FakeSpawner::default());
        let manager = manager(&spawner);
        manager.start(options()).unwrap();

        let err = manager
            .execute_command(ExecuteOptions::new("sleep 5").with_timeout_ms(50))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TIMEOUT");
        assert!(manager.history().is_empty());

        let result = manager.execute_command("echo back").await.unwrap();
        assert_eq!(result.output, "back");
    }

    #[tokio::test]
    async fn test_resize_updates_dimensions() {
        let spawner = Arc::new(FakeSpawner::default());
        let manager = manager(&spawner);
        manager.start(options()).unwrap();

        manager.resize(40, 120).unwrap();

        assert_eq!(manager.dimensions(), Some(Dimensions::new(40, 120)));
        let (_, shell) = spawner.last().unwrap();
        assert_eq!(shell.dimensions(), Dimensions::new(40, 120));
    }

    #[tokio::test]
    async fn test_resize_before_start_is_noop() {
        let spawner = Arc::new(FakeSpawner::default());
        let manager = manager(&spawner);

        assert!(manager.resize(40, 120).is_ok());
        assert!(manager.dimensions().is_none());
    }

    #[tokio::test]
    async fn test_resize_after_shell_exit_is_noop() {
        let spawner = Arc::new(FakeSpawner::default());
        let manager = manager(&spawner);
        manager.start(options()).unwrap();
        let (_, shell) = spawner.last().unwrap();
        shell.exit_with(0);
        let mut events = manager.subscribe();

        assert!(manager.resize(40, 120).is_ok());

        assert_eq!(manager.dimensions(), Some(Dimensions::new(24, 80)));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_restart_kills_previous_process() {
        let spawner = Arc::new(FakeSpawner::default());
        let manager = manager(&spawner);

        manager.start(options()).unwrap();
        let (_, first) = spawner.last().unwrap();
        manager.start(options()).unwrap();
        let (_, second) = spawner.last().unwrap();

        assert_eq!(first.kill_count(), 1);
        assert_eq!(second.kill_count(), 0);
        assert_eq!(manager.process_id(), Some(1001));
        // The old shell's exit does not leak into the new state
        assert_eq!(manager.status(), SessionStatus::Running);
    }

    #[tokio::test]
    async fn test_spawn_failure_propagates() {
        let spawner = Arc::new(FakeSpawner::failing());
        let manager = manager(&spawner);

        let err = manager.start(options()).unwrap_err();
        assert_eq!(err.code(), "SPAWN_FAILURE");
        assert!(manager.process_id().is_none());
        assert!(matches!(
            manager.execute_command("echo hi").await,
            Err(SessionError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_shell_exit_clears_pid() {
        let spawner = Arc::new(FakeSpawner::default());
        let manager = manager(&spawner);
        manager.start(options()).unwrap();

        let exits = Arc::new(AtomicUsize::new(0));
        let counter = exits.clone();
        let _exit = manager.on_exit(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let (_, shell) = spawner.last().unwrap();
        shell.exit_with(3);

        assert!(manager.process_id().is_none());
        assert_eq!(manager.status(), SessionStatus::Exited);
        assert_eq!(manager.info().unwrap().exit_code, Some(3));
        assert_eq!(exits.load(Ordering::SeqCst), 1);
        assert!(matches!(
            manager.execute_command("echo hi").await,
            Err(SessionError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_stop_kills_and_marks_stopped() {
        let spawner = Arc::new(FakeSpawner::default());
        let manager = manager(&spawner);
        manager.start(options()).unwrap();

        manager.stop();
        manager.stop();

        let (_, shell) = spawner.last().unwrap();
        assert_eq!(shell.kill_count(), 1);
        assert_eq!(manager.status(), SessionStatus::Stopped);
        assert!(manager.process_id().is_none());
    }

    #[tokio::test]
    async fn test_drop_kills_process() {
        let spawner = Arc::new(FakeSpawner::default());
        {
            let manager = manager(&spawner);
            manager.start(options()).unwrap();
        }

        let (_, shell) = spawner.last().unwrap();
        assert_eq!(shell.kill_count(), 1);
    }

    #[tokio::test]
    async fn test_raw_observer_sees_markers() {
        let spawner = Arc::new(FakeSpawner::default());
        let manager = manager(&spawner);
        manager.start(options()).unwrap();

        let seen = Arc::new(Mutex::new(String::new()));
        let sink = seen.clone();
        let _output = manager.on_output(move |chunk| {
            sink.lock().push_str(&String::from_utf8_lossy(chunk));
        });

        let result = manager.execute_command("echo hi").await.unwrap();

        assert!(!result.output.contains("__SP_DONE_"));
        assert!(seen.lock().contains("__SP_DONE_"));
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let spawner = Arc::new(FakeSpawner::default());
        let manager = manager(&spawner);
        let mut events = manager.subscribe();

        manager.start(options()).unwrap();
        manager.execute_command("echo hi").await.unwrap();

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.session_id(), "test");
            if !matches!(event, SessionEvent::Output { .. }) {
                names.push(event.global_event_name());
            }
        }
        assert_eq!(names, vec!["session-status", "command-started", "command-completed"]);
    }

    #[tokio::test]
    async fn test_suggestions_receive_recent_history_and_cwd() {
        let spawner = Arc::new(FakeSpawner::default());
        let suggester = Arc::new(RecordingSuggester::default());
        let manager = manager(&spawner).with_suggester(suggester.clone());
        manager.start(options()).unwrap();

        for i in 0..7 {
            manager.execute_command(format!("echo {}", i)).await.unwrap();
        }
        let suggestions = manager.get_suggestions("git").await;

        assert_eq!(suggestions, vec!["git --help"]);
        let context = suggester.seen.lock().clone().unwrap();
        assert_eq!(context.previous_commands, vec!["echo 2", "echo 3", "echo 4", "echo 5", "echo 6"]);
        assert_eq!(context.current_directory, "/tmp");
    }

    #[tokio::test]
    async fn test_suggestion_failure_degrades_to_empty() {
        let spawner = Arc::new(FakeSpawner::default());
        let manager = manager(&spawner).with_suggester(Arc::new(FailingSuggester));
        manager.start(options()).unwrap();

        assert!(manager.get_suggestions("ls").await.is_empty());
    }

    #[tokio::test]
    async fn test_slow_suggester_times_out() {
        let mut config = EngineConfig::default();
        config.suggestions.timeout_ms = 20;
        let manager = SessionManager::new("test", config).with_suggester(Arc::new(SlowSuggester));

        assert!(manager.get_suggestions("ls").await.is_empty());
    }

    #[test]
    fn test_resolve_shell_keeps_paths() {
        assert_eq!(resolve_shell("/bin/sh".to_string()), PathBuf::from("/bin/sh"));
        assert_eq!(resolve_shell("./shell".to_string()), PathBuf::from("./shell"));
        assert_eq!(
            resolve_shell("surely-not-a-shell-on-path".to_string()),
            PathBuf::from("surely-not-a-shell-on-path")
        );
    }
}
