//! Scripted stand-in for a shell process.
//!
//! Understands just enough of the injected command line to answer the way an
//! interactive bash would: it echoes the typed line, prints the start marker,
//! the command's output, then the completion marker.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::process::{Dimensions, ProcessSpawner, PtyProcess, SpawnOptions};
use super::subscription::{Subscribers, Subscription};
use crate::error::{SessionError, SessionResult};

pub(crate) struct FakeShell {
    pid: u32,
    output: Subscribers<Bytes>,
    exit: Subscribers<u32>,
    exit_status: Mutex<Option<u32>>,
    alive: AtomicBool,
    writes: Mutex<Vec<String>>,
    dimensions: Mutex<Dimensions>,
    kills: AtomicUsize,
    prepend: Mutex<Option<String>>,
}

impl FakeShell {
    pub(crate) fn new(pid: u32) -> Self {
        Self {
            pid,
            output: Subscribers::new(),
            exit: Subscribers::new(),
            exit_status: Mutex::new(None),
            alive: AtomicBool::new(true),
            writes: Mutex::new(Vec::new()),
            dimensions: Mutex::new(Dimensions::default()),
            kills: AtomicUsize::new(0),
            prepend: Mutex::new(None),
        }
    }

    /// Output printed after the echo of the next line, before the command runs
    pub(crate) fn prepend_next(&self, text: &str) {
        *self.prepend.lock() = Some(text.to_string());
    }

    /// Push raw bytes to output subscribers
    pub(crate) fn emit(&self, text: &str) {
        self.output.emit(&Bytes::copy_from_slice(text.as_bytes()));
    }

    pub(crate) fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    pub(crate) fn dimensions(&self) -> Dimensions {
        *self.dimensions.lock()
    }

    pub(crate) fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub(crate) fn exit_with(&self, code: u32) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        *self.exit_status.lock() = Some(code);
        self.exit.emit(&code);
    }

    fn run(&self, command: &str, sentinel: &str) {
        let command = command.trim();

        // `( cd 'dir' && cmd )`
        if let Some(inner) = command.strip_prefix("( cd ") {
            if let Some((_, rest)) = inner.split_once(" && ") {
                let rest = rest.trim_end().trim_end_matches(')').trim_end();
                return self.run(rest, sentinel);
            }
        }

        if let Some(code) = command.strip_prefix("exit ") {
            self.emit("exit\r\n");
            self.exit_with(code.trim().parse().unwrap_or(0));
            return;
        }

        if command.starts_with("sleep") || command == "cat" {
            return;
        }

        let code = if let Some(text) = command.strip_prefix("echo ") {
            self.emit(&format!("{}\r\n", text.trim_matches('\'')));
            0
        } else if command == "true" {
            0
        } else if command == "false" {
            1
        } else if let Some(code) = command.strip_prefix("fail ") {
            code.trim().parse().unwrap_or(1)
        } else {
            self.emit(&format!("sh: {}: command not found\r\n", command));
            127
        };

        // Marker and line ending arrive as separate chunks
        self.emit(&format!("{}{}", sentinel, code));
        self.emit("\r\n$ ");
    }
}

impl PtyProcess for FakeShell {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn write(&self, data: &[u8]) -> SessionResult<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(SessionError::ProcessExited);
        }

        let text = String::from_utf8_lossy(data).to_string();
        self.writes.lock().push(text.clone());

        if data == b"\x03" {
            self.emit("^C\r\n$ ");
            return Ok(());
        }

        self.emit(&format!("{}\r\n", text.trim_end()));
        let prepend = self.prepend.lock().take();
        if let Some(prepend) = prepend {
            self.emit(&prepend);
        }

        // echo 'SENTINEL'go ; <command> ; echo SENTINEL$?
        let mut rest = text.as_str();
        if let Some((start, after)) = text
            .strip_prefix("echo '")
            .and_then(|t| t.split_once("'go ; "))
        {
            self.emit(&format!("{}go\r\n", start));
            rest = after;
        }

        if let Some(idx) = rest.rfind(" ; echo ") {
            let command = &rest[..idx];
            let marker = rest[idx + " ; echo ".len()..].trim_end();
            let sentinel = marker
                .strip_suffix("$?")
                .or_else(|| marker.strip_suffix("$status"))
                .unwrap_or(marker);
            self.run(command, sentinel);
        }
        Ok(())
    }

    fn resize(&self, dimensions: Dimensions) -> SessionResult<()> {
        *self.dimensions.lock() = dimensions;
        Ok(())
    }

    fn subscribe_output(&self, callback: Box<dyn Fn(&Bytes) + Send + Sync>) -> Subscription {
        self.output.subscribe(callback)
    }

    fn subscribe_exit(&self, callback: Box<dyn Fn(&u32) + Send + Sync>) -> Subscription {
        let status = *self.exit_status.lock();
        if let Some(code) = status {
            callback(&code);
            return Subscription::disposed();
        }
        self.exit.subscribe(callback)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn kill(&self) {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.exit_with(143);
    }
}

/// Hands out `FakeShell`s and remembers what it was asked to spawn
#[derive(Default)]
pub(crate) struct FakeSpawner {
    spawned: Mutex<Vec<(SpawnOptions, Arc<FakeShell>)>>,
    fail: bool,
}

impl FakeSpawner {
    pub(crate) fn failing() -> Self {
        Self {
            spawned: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub(crate) fn last(&self) -> Option<(SpawnOptions, Arc<FakeShell>)> {
        self.spawned.lock().last().cloned()
    }

    pub(crate) fn count(&self) -> usize {
        self.spawned.lock().len()
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, options: &SpawnOptions) -> SessionResult<Arc<dyn PtyProcess>> {
        if self.fail {
            return Err(SessionError::SpawnFailed {
                shell: options.shell.display().to_string(),
                cwd: options.cwd.display().to_string(),
                reason: "No such file or directory".to_string(),
            });
        }

        let mut spawned = self.spawned.lock();
        let shell = Arc::new(FakeShell::new(1000 + spawned.len() as u32));
        *shell.dimensions.lock() = options.dimensions;
        spawned.push((options.clone(), shell.clone()));
        Ok(shell)
    }
}
