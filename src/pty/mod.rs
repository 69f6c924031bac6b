//! PTY Module
//!
//! Pseudo-terminal process ownership:
//! - Spawning a shell attached to a PTY (portable-pty)
//! - Byte-level input, resize and teardown
//! - Output and exit notifications through disposable subscriptions

pub mod process;
pub mod subscription;

#[cfg(test)]
pub(crate) mod testing;

pub use process::{Dimensions, NativeSpawner, ProcessHandle, ProcessSpawner, PtyProcess, SpawnOptions};
pub use subscription::{Subscribers, Subscription};
