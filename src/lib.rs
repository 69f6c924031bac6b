//! shellpilot: interactive shell sessions over a pseudo-terminal, with one
//! structured result per executed command.

pub mod cli;
pub mod config;
pub mod error;
pub mod protocol;
pub mod pty;
pub mod session;
pub mod suggest;

pub use config::EngineConfig;
pub use error::{SessionError, SessionResult};
pub use protocol::{CommandResult, ExecuteOptions};
pub use session::{SessionManager, SessionRegistry, StartOptions};

use clap::Parser;

/// Parse arguments, run the CLI and return the exit code
pub async fn run() -> anyhow::Result<i32> {
    cli::run(cli::Cli::parse()).await
}
