//! PTY Process Handle
//!
//! Owns one shell process attached to a pseudo-terminal. Output is read on a
//! background thread and fanned out to subscribers as `Bytes` chunks; a second
//! thread waits for the child and publishes its exit status once.

use bytes::Bytes;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use super::subscription::{Subscribers, Subscription};
use crate::error::{SessionError, SessionResult};

/// Grace period between hangup and SIGKILL
const KILL_GRACE: Duration = Duration::from_millis(250);

/// How long the exit notification waits for the reader to drain
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Terminal size in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub rows: u16,
    pub cols: u16,
}

impl Dimensions {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            rows: rows.max(1),
            cols: cols.max(1),
        }
    }

    fn pty_size(self) -> PtySize {
        PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Everything needed to launch a shell in a PTY
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub shell: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub dimensions: Dimensions,
}

/// The process side of a session: byte I/O, resize, exit and teardown
pub trait PtyProcess: Send + Sync {
    /// OS process id, if known
    fn pid(&self) -> Option<u32>;

    /// Send bytes to the process input
    fn write(&self, data: &[u8]) -> SessionResult<()>;

    /// Resize the terminal; a no-op once the process has exited
    fn resize(&self, dimensions: Dimensions) -> SessionResult<()>;

    /// Receive output chunks in arrival order
    fn subscribe_output(&self, callback: Box<dyn Fn(&Bytes) + Send + Sync>) -> Subscription;

    /// Receive the exit status once. Fires immediately if the process already exited.
    fn subscribe_exit(&self, callback: Box<dyn Fn(&u32) + Send + Sync>) -> Subscription;

    fn is_alive(&self) -> bool;

    /// Request termination; safe to call repeatedly
    fn kill(&self);
}

/// Creates `PtyProcess` instances
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, options: &SpawnOptions) -> SessionResult<Arc<dyn PtyProcess>>;
}

/// Spawns real processes through the platform's native PTY system
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSpawner;

impl ProcessSpawner for NativeSpawner {
    fn spawn(&self, options: &SpawnOptions) -> SessionResult<Arc<dyn PtyProcess>> {
        Ok(Arc::new(ProcessHandle::spawn(options)?))
    }
}

/// Exit bookkeeping shared with the waiter thread
struct ExitState {
    status: Mutex<Option<u32>>,
    subscribers: Subscribers<u32>,
}

/// A shell process running in a pseudo-terminal
pub struct ProcessHandle {
    pid: Option<u32>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    output: Arc<Subscribers<Bytes>>,
    exit: Arc<ExitState>,
    alive: Arc<AtomicBool>,
    killed: AtomicBool,
}

impl ProcessHandle {
    /// Open a PTY and start the shell in it
    pub fn spawn(options: &SpawnOptions) -> SessionResult<Self> {
        let spawn_failed = |reason: String| SessionError::SpawnFailed {
            shell: options.shell.display().to_string(),
            cwd: options.cwd.display().to_string(),
            reason,
        };

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(options.dimensions.pty_size())
            .map_err(|e| spawn_failed(format!("Failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&options.shell);
        if !options.args.is_empty() {
            cmd.args(options.args.iter().map(|arg| arg.as_str()));
        }
        cmd.cwd(&options.cwd);
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_failed(e.to_string()))?;
        // The reader only sees EOF once our copy of the slave is gone
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| spawn_failed(format!("Failed to get PTY reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| spawn_failed(format!("Failed to get PTY writer: {}", e)))?;

        let output = Arc::new(Subscribers::<Bytes>::new());
        let exit = Arc::new(ExitState {
            status: Mutex::new(None),
            subscribers: Subscribers::new(),
        });
        let alive = Arc::new(AtomicBool::new(true));

        let (drained_tx, drained_rx) = mpsc::channel::<()>();
        let reader_output = output.clone();
        thread::Builder::new()
            .name(format!("pty-reader-{}", pid.unwrap_or(0)))
            .spawn(move || {
                let mut buf = [0u8; 8192];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => reader_output.emit(&Bytes::copy_from_slice(&buf[..n])),
                        Err(_) => break,
                    }
                }
                let _ = drained_tx.send(());
            })
            .map_err(|e| spawn_failed(format!("Failed to start reader thread: {}", e)))?;

        let waiter_exit = exit.clone();
        let waiter_alive = alive.clone();
        thread::Builder::new()
            .name(format!("pty-waiter-{}", pid.unwrap_or(0)))
            .spawn(move || {
                let code = match child.wait() {
                    Ok(status) => status.exit_code(),
                    Err(e) => {
                        warn!("Failed to wait for shell process: {}", e);
                        1
                    }
                };
                waiter_alive.store(false, Ordering::SeqCst);

                // Let trailing output reach subscribers before the exit notice
                if drained_rx.recv_timeout(READER_DRAIN_TIMEOUT).is_err() {
                    debug!("PTY reader still open after shell exit");
                }

                *waiter_exit.status.lock() = Some(code);
                waiter_exit.subscribers.emit(&code);
            })
            .map_err(|e| spawn_failed(format!("Failed to start waiter thread: {}", e)))?;

        info!(
            "Spawned {} (pid {:?}) in {} at {}x{}",
            options.shell.display(),
            pid,
            options.cwd.display(),
            options.dimensions.rows,
            options.dimensions.cols
        );

        Ok(Self {
            pid,
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            killer: Mutex::new(killer),
            output,
            exit,
            alive,
            killed: AtomicBool::new(false),
        })
    }

    /// Exit status, once the process has terminated
    pub fn exit_status(&self) -> Option<u32> {
        *self.exit.status.lock()
    }

    fn wait_for_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !self.alive.load(Ordering::SeqCst) {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        !self.alive.load(Ordering::SeqCst)
    }
}

impl PtyProcess for ProcessHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn write(&self, data: &[u8]) -> SessionResult<()> {
        if !self.is_alive() {
            return Err(SessionError::ProcessExited);
        }
        let mut writer = self.writer.lock();
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    fn resize(&self, dimensions: Dimensions) -> SessionResult<()> {
        if !self.is_alive() {
            return Ok(());
        }
        self.master
            .lock()
            .resize(dimensions.pty_size())
            .map_err(|e| SessionError::Pty(format!("Failed to resize PTY: {}", e)))
    }

    fn subscribe_output(&self, callback: Box<dyn Fn(&Bytes) + Send + Sync>) -> Subscription {
        self.output.subscribe(callback)
    }

    fn subscribe_exit(&self, callback: Box<dyn Fn(&u32) + Send + Sync>) -> Subscription {
        // Hold the status lock so the waiter cannot publish between check and register
        let status = self.exit.status.lock();
        if let Some(code) = *status {
            drop(status);
            callback(&code);
            return Subscription::disposed();
        }
        let subscription = self.exit.subscribers.subscribe(callback);
        drop(status);
        subscription
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn kill(&self) {
        if self.killed.swap(true, Ordering::SeqCst) || !self.is_alive() {
            return;
        }

        debug!("Killing shell process {:?}", self.pid);

        // The shell leads its own process group; take its descendants down too.
        // Interactive shells ignore SIGTERM but exit on SIGHUP.
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                unsafe {
                    libc::kill(-(pid as i32), libc::SIGHUP);
                    libc::kill(-(pid as i32), libc::SIGTERM);
                }
                if self.wait_for_exit(KILL_GRACE) {
                    return;
                }
                unsafe {
                    libc::kill(-(pid as i32), libc::SIGKILL);
                }
            }
        }

        if let Err(e) = self.killer.lock().kill() {
            if self.is_alive() {
                error!("Failed to kill shell process {:?}: {}", self.pid, e);
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.kill();
        self.output.clear();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    fn sh(script: &str) -> SpawnOptions {
        SpawnOptions {
            shell: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: std::env::temp_dir(),
            env: HashMap::new(),
            dimensions: Dimensions::default(),
        }
    }

    #[test]
    fn test_dimensions_are_clamped() {
        assert_eq!(Dimensions::new(0, 0), Dimensions::new(1, 1));
        assert_eq!(Dimensions::default(), Dimensions::new(24, 80));
    }

    #[test]
    fn test_output_then_exit_status() {
        let handle = ProcessHandle::spawn(&sh("sleep 0.3; printf ready; exit 3")).unwrap();
        assert!(handle.pid().is_some());

        let output = Arc::new(Mutex::new(Vec::new()));
        let sink = output.clone();
        let _output = handle.subscribe_output(Box::new(move |chunk: &Bytes| {
            sink.lock().extend_from_slice(chunk);
        }));

        let (tx, rx) = channel();
        let _exit = handle.subscribe_exit(Box::new(move |code: &u32| {
            let _ = tx.send(*code);
        }));

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 3);
        assert!(!handle.is_alive());
        assert_eq!(handle.exit_status(), Some(3));
        assert!(String::from_utf8_lossy(&output.lock()).contains("ready"));
        assert!(matches!(handle.write(b"x"), Err(SessionError::ProcessExited)));
        assert!(handle.resize(Dimensions::new(10, 10)).is_ok());
    }

    #[test]
    fn test_late_exit_subscriber_fires_immediately() {
        let handle = ProcessHandle::spawn(&sh("exit 0")).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.exit_status().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        let (tx, rx) = channel();
        let _exit = handle.subscribe_exit(Box::new(move |code: &u32| {
            let _ = tx.send(*code);
        }));
        assert_eq!(rx.try_recv().unwrap(), 0);
    }

    #[test]
    fn test_kill_is_idempotent() {
        let handle = ProcessHandle::spawn(&sh("sleep 30")).unwrap();
        let (tx, rx) = channel();
        let _exit = handle.subscribe_exit(Box::new(move |code: &u32| {
            let _ = tx.send(*code);
        }));

        handle.kill();
        handle.kill();

        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert!(!handle.is_alive());
    }

    #[test]
    fn test_kill_hangs_up_shells_that_ignore_sigterm() {
        let handle = ProcessHandle::spawn(&sh("trap '' TERM; while :; do sleep 0.05; done")).unwrap();
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        handle.kill();

        assert!(started.elapsed() < KILL_GRACE, "{:?}", started.elapsed());
        assert!(!handle.is_alive());
    }

    #[test]
    fn test_spawn_failure_names_shell() {
        let mut options = sh("true");
        options.shell = PathBuf::from("/definitely/not/a/shell");

        match ProcessHandle::spawn(&options) {
            Err(SessionError::SpawnFailed { shell, .. }) => assert_eq!(shell, "/definitely/not/a/shell"),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("spawn should fail"),
        }
    }
}
