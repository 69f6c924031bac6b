//! Command line interface
//!
//! - `shell`: interactive loop, one structured result per typed command
//! - `exec`: run a single command and mirror its exit code

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::EngineConfig;
use crate::error::SessionError;
use crate::protocol::{CommandResult, ExecuteOptions};
use crate::session::{SessionManager, StartOptions};
use crate::suggest::HistorySuggester;

/// Exit code reported when a command times out
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported after Ctrl-C
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "shellpilot")]
#[command(about = "Interactive shell sessions with structured command results")]
#[command(version)]
pub struct Cli {
    /// Configuration file (toml, json or yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Shell to spawn, by path or name
    #[arg(long, global = true)]
    pub shell: Option<String>,

    /// Working directory for the shell
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    /// Per-command timeout in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive session (default)
    Shell {
        /// Also print the raw terminal stream to stderr
        #[arg(long)]
        raw: bool,
    },
    /// Run one command and exit with its status
    Exec {
        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

/// Initialize env_logger; `RUST_LOG` wins over the default filter
pub fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init();
}

/// Run the CLI and return the process exit code
pub async fn run(cli: Cli) -> Result<i32> {
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path).await?,
        None => EngineConfig::load_default().await?,
    };

    let session = SessionManager::new("cli", config)
        .with_suggester(Arc::new(HistorySuggester::default()));
    session.start(StartOptions {
        shell: cli.shell.clone(),
        cwd: cli.cwd.clone(),
        ..StartOptions::default()
    })?;

    let code = match cli.command {
        Some(Commands::Exec { json, command }) => exec(&session, command.join(" "), cli.timeout_ms, json).await?,
        Some(Commands::Shell { raw }) => interactive(&session, cli.timeout_ms, raw).await?,
        None => interactive(&session, cli.timeout_ms, false).await?,
    };

    session.stop();
    Ok(code)
}

fn execute_options(command: String, timeout_ms: Option<u64>) -> ExecuteOptions {
    let options = ExecuteOptions::new(command);
    match timeout_ms {
        Some(ms) => options.with_timeout_ms(ms),
        None => options,
    }
}

async fn exec(session: &SessionManager, command: String, timeout_ms: Option<u64>, json: bool) -> Result<i32> {
    let execution = session.execute_command(execute_options(command, timeout_ms));

    let result = tokio::select! {
        result = execution => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping session");
            return Ok(INTERRUPTED_EXIT_CODE);
        }
    };

    match result {
        Ok(result) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if !result.output.is_empty() {
                println!("{}", result.output);
            }
            Ok(result.exit_code)
        }
        Err(e @ SessionError::Timeout { .. }) => {
            eprintln!("error [{}]: {}", e.code(), e);
            Ok(TIMEOUT_EXIT_CODE)
        }
        Err(e) => Err(e.into()),
    }
}

async fn interactive(session: &SessionManager, timeout_ms: Option<u64>, raw: bool) -> Result<i32> {
    let _raw = raw.then(|| {
        session.on_output(|chunk| {
            let mut stderr = std::io::stderr();
            let _ = stderr.write_all(chunk);
            let _ = stderr.flush();
        })
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt()?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping session");
                return Ok(INTERRUPTED_EXIT_CODE);
            }
        };
        let Some(line) = line else {
            return Ok(0);
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(directive) = line.strip_prefix(':') {
            if !directive_command(session, directive).await? {
                return Ok(0);
            }
            continue;
        }

        let execution = session.execute_command(execute_options(line.to_string(), timeout_ms));
        let result = tokio::select! {
            result = execution => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping session");
                return Ok(INTERRUPTED_EXIT_CODE);
            }
        };

        match result {
            Ok(result) => print_result(&result),
            Err(e) if e.is_recoverable() => eprintln!("error [{}]: {}", e.code(), e),
            Err(e) => return Err(e.into()),
        }

        if !session.is_running() {
            debug!("Shell is gone, leaving interactive loop");
            return Ok(session.info().and_then(|i| i.exit_code).unwrap_or(0) as i32);
        }
    }
}

/// Handle a `:` directive. Returns false when the loop should end.
async fn directive_command(session: &SessionManager, directive: &str) -> Result<bool> {
    let mut words = directive.split_whitespace();
    match words.next() {
        Some("quit") | Some("q") => return Ok(false),
        Some("resize") => {
            let rows = words.next().and_then(|w| w.parse().ok());
            let cols = words.next().and_then(|w| w.parse().ok());
            match (rows, cols) {
                (Some(rows), Some(cols)) => {
                    session.resize(rows, cols)?;
                    println!("resized to {}x{}", rows, cols);
                }
                _ => eprintln!("usage: :resize ROWS COLS"),
            }
        }
        Some("suggest") => {
            let partial = words.collect::<Vec<_>>().join(" ");
            for suggestion in session.get_suggestions(&partial).await {
                println!("{}", suggestion);
            }
        }
        Some("history") => {
            for (i, command) in session.history().entries().iter().enumerate() {
                println!("{:>4}  {}", i + 1, command);
            }
        }
        Some("info") => {
            if let Some(info) = session.info() {
                println!("{}", serde_json::to_string_pretty(&info)?);
            }
        }
        _ => eprintln!("commands: :resize ROWS COLS, :suggest TEXT, :history, :info, :quit"),
    }
    Ok(true)
}

fn print_result(result: &CommandResult) {
    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    match &result.error {
        Some(error) => eprintln!("[{}: exit {}]", error, result.exit_code),
        None if result.exit_code != 0 => eprintln!("[exit {}]", result.exit_code),
        None => {}
    }
}

fn prompt() -> Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "shellpilot> ")?;
    stdout.flush()?;
    Ok(())
}
