//! Completion Protocol
//!
//! Turns the PTY's byte stream into one structured result per command:
//! inject a per-invocation marker after the command, accumulate output until
//! the marker shows up with an exit status, then cut the output out.
//!
//! One command may be in flight at a time. A second caller gets
//! `SessionError::Busy` instead of sharing the output stream.

use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use super::dialect::ShellDialect;
use super::scanner::{extract_output, find_marker, Marker};
use super::sentinel::Sentinel;
use super::types::{CommandResult, ProtocolState};
use crate::config::CommandConfig;
use crate::error::{SessionError, SessionResult};
use crate::pty::PtyProcess;
use crate::session::history::HistoryLog;

/// Message attached to results of commands cut short by the shell exiting
pub const SHELL_EXITED: &str = "shell exited before completion marker";

/// A command between injection and resolution
struct PendingCommand {
    command: String,
    sentinel: Sentinel,
    start_marker: String,
    exit_notice: Option<&'static str>,
    started: Instant,
    buffer: BytesMut,
    deadline: tokio::time::Instant,
}

impl PendingCommand {
    fn new(command: &str, dialect: ShellDialect, timeout: Duration) -> Self {
        let sentinel = Sentinel::generate();
        let start_marker = dialect.start_marker(sentinel.as_str());
        Self {
            command: command.to_string(),
            sentinel,
            start_marker,
            exit_notice: dialect.exit_notice(),
            started: Instant::now(),
            buffer: BytesMut::new(),
            deadline: tokio::time::Instant::now() + timeout,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Command/response state machine for one session
pub struct CompletionProtocol {
    in_flight: tokio::sync::Mutex<()>,
    state: Mutex<ProtocolState>,
    last_outcome: Mutex<Option<ProtocolState>>,
    /// Sentinels of timed-out commands that may still print, oldest first
    abandoned: Mutex<VecDeque<String>>,
    abandoned_limit: usize,
    interrupt_on_timeout: bool,
}

impl CompletionProtocol {
    pub fn new(config: &CommandConfig) -> Self {
        Self {
            in_flight: tokio::sync::Mutex::new(()),
            state: Mutex::new(ProtocolState::Idle),
            last_outcome: Mutex::new(None),
            abandoned: Mutex::new(VecDeque::new()),
            abandoned_limit: config.abandoned_limit.max(1),
            interrupt_on_timeout: config.interrupt_on_timeout,
        }
    }

    /// Current state; terminal states are reported by `last_outcome`
    pub fn state(&self) -> ProtocolState {
        *self.state.lock()
    }

    /// Terminal state of the most recent command
    pub fn last_outcome(&self) -> Option<ProtocolState> {
        *self.last_outcome.lock()
    }

    pub fn is_busy(&self) -> bool {
        self.state() == ProtocolState::AwaitingCompletion
    }

    /// Sentinels of timed-out commands not yet seen again
    pub fn abandoned(&self) -> Vec<String> {
        self.abandoned.lock().iter().cloned().collect()
    }

    /// Run `command` and wait for its marker.
    ///
    /// On success the command is appended to `history`. On timeout the
    /// command keeps running in the shell (unless interrupted) and its marker
    /// is remembered so it cannot resolve or pollute later commands.
    pub async fn execute(
        &self,
        process: &dyn PtyProcess,
        history: &HistoryLog,
        dialect: ShellDialect,
        command: &str,
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> SessionResult<CommandResult> {
        let _flight = self.in_flight.try_lock().map_err(|_| SessionError::Busy)?;

        if !process.is_alive() {
            return Err(SessionError::NotInitialized);
        }

        let _state = StateGuard::enter(self);
        let mut pending = PendingCommand::new(command, dialect, timeout);

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<Bytes>();
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel::<u32>();

        // Dropped on every return path, which disposes both exactly once
        let _output = process.subscribe_output(Box::new(move |chunk: &Bytes| {
            let _ = chunk_tx.send(chunk.clone());
        }));
        let _exit = process.subscribe_exit(Box::new(move |code: &u32| {
            let _ = exit_tx.send(*code);
        }));

        let typed = match cwd {
            Some(dir) => dialect.in_directory(command, dir),
            None => command.to_string(),
        };
        let line = dialect.command_line(&typed, pending.sentinel.as_str());
        if let Err(e) = process.write(line.as_bytes()) {
            self.finish(ProtocolState::Errored);
            return Err(e);
        }

        debug!("Awaiting marker for {:?} ({})", pending.command, pending.sentinel);

        let deadline = tokio::time::sleep_until(pending.deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                Some(chunk) = chunk_rx.recv() => {
                    pending.buffer.extend_from_slice(&chunk);
                    if let Some(marker) = find_marker(&pending.buffer, pending.sentinel.as_str()) {
                        let result = self.resolve(&pending, marker);
                        history.append(&pending.command);
                        self.finish(ProtocolState::Resolved);
                        return Ok(result);
                    }
                }

                Some(code) = exit_rx.recv() => {
                    while let Ok(chunk) = chunk_rx.try_recv() {
                        pending.buffer.extend_from_slice(&chunk);
                    }
                    if let Some(marker) = find_marker(&pending.buffer, pending.sentinel.as_str()) {
                        let result = self.resolve(&pending, marker);
                        history.append(&pending.command);
                        self.finish(ProtocolState::Resolved);
                        return Ok(result);
                    }

                    warn!("Shell exited with {} while running {:?}", code, pending.command);
                    let result = self.exited(&pending, code);
                    self.finish(ProtocolState::Errored);
                    return Ok(result);
                }

                _ = &mut deadline => {
                    warn!(
                        "Command timed out after {}ms: {:?}",
                        timeout.as_millis(),
                        pending.command
                    );
                    self.abandon(pending.sentinel.as_str());
                    if self.interrupt_on_timeout {
                        if let Err(e) = process.write(dialect.interrupt()) {
                            warn!("Failed to interrupt timed-out command: {}", e);
                        }
                    }
                    self.finish(ProtocolState::TimedOut);
                    return Err(SessionError::Timeout {
                        command: pending.command,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            }
        }
    }

    fn resolve(&self, pending: &PendingCommand, marker: Marker) -> CommandResult {
        let abandoned = self.abandoned();
        let extracted = extract_output(
            &pending.buffer,
            marker.start,
            pending.sentinel.as_str(),
            &pending.start_marker,
            &abandoned,
        );
        self.retire(&extracted.retired);

        debug!(
            "Command {:?} exited with {} after {}ms",
            pending.command,
            marker.exit_code,
            pending.elapsed_ms()
        );

        CommandResult {
            command: pending.command.clone(),
            output: extracted.output,
            exit_code: marker.exit_code,
            error: None,
            duration_ms: pending.elapsed_ms(),
        }
    }

    fn exited(&self, pending: &PendingCommand, code: u32) -> CommandResult {
        let abandoned = self.abandoned();
        let extracted = extract_output(
            &pending.buffer,
            pending.buffer.len(),
            pending.sentinel.as_str(),
            &pending.start_marker,
            &abandoned,
        );
        self.retire(&extracted.retired);

        let output = match pending.exit_notice {
            Some(notice) => without_exit_notice(&extracted.output, notice),
            None => extracted.output,
        };

        CommandResult {
            command: pending.command.clone(),
            output,
            exit_code: code as i32,
            error: Some(SHELL_EXITED.to_string()),
            duration_ms: pending.elapsed_ms(),
        }
    }

    fn abandon(&self, sentinel: &str) {
        let mut abandoned = self.abandoned.lock();
        abandoned.push_back(sentinel.to_string());
        while abandoned.len() > self.abandoned_limit {
            abandoned.pop_front();
        }
    }

    fn retire(&self, seen: &[String]) {
        if seen.is_empty() {
            return;
        }
        let mut abandoned = self.abandoned.lock();
        abandoned.retain(|s| !seen.contains(s));
        debug!("Discarded {} stale marker(s)", seen.len());
    }

    fn finish(&self, outcome: ProtocolState) {
        *self.last_outcome.lock() = Some(outcome);
    }
}

/// Drop the farewell line a shell prints when it exits
fn without_exit_notice(output: &str, notice: &str) -> String {
    match output.rsplit_once('\n') {
        Some((rest, last)) if last.trim() == notice => rest.trim_end().to_string(),
        None if output.trim() == notice => String::new(),
        _ => output.to_string(),
    }
}

/// Holds `AwaitingCompletion` for the lifetime of one `execute` call
struct StateGuard<'a> {
    protocol: &'a CompletionProtocol,
}

impl<'a> StateGuard<'a> {
    fn enter(protocol: &'a CompletionProtocol) -> Self {
        *protocol.state.lock() = ProtocolState::AwaitingCompletion;
        Self { protocol }
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        *self.protocol.state.lock() = ProtocolState::Idle;
    }
}
