//! Completion Protocol Module
//!
//! Command boundaries on top of an unstructured PTY stream:
//! - Per-invocation randomized completion markers
//! - Shell-dialect templating of the injected line
//! - Marker scanning that ignores the shell's echo and stale markers
//! - Single-flight execution with timeouts

pub mod completion;
pub mod dialect;
pub mod scanner;
pub mod sentinel;
pub mod types;

pub use completion::{CompletionProtocol, SHELL_EXITED};
pub use dialect::ShellDialect;
pub use sentinel::Sentinel;
pub use types::{CommandResult, ExecuteOptions, ProtocolState};
