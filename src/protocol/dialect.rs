//! Shell dialects
//!
//! How the completion marker is injected depends on the shell's syntax for
//! "run this, then print the last exit status".

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Ctrl-C; the line discipline turns it into SIGINT for the foreground job
const INTERRUPT: &[u8] = b"\x03";

/// Appended to the sentinel to form the start-of-output line
const START_TAG: &str = "go";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellDialect {
    /// sh, bash, zsh, dash, ksh: `cmd ; echo MARKER$?`
    #[default]
    Posix,
    /// fish: `cmd ; echo MARKER$status`
    Fish,
}

impl ShellDialect {
    /// Guess the dialect from the shell's file name
    pub fn detect(shell: &Path) -> Self {
        let name = shell
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        match name.as_str() {
            "fish" => Self::Fish,
            _ => Self::Posix,
        }
    }

    fn status_variable(self) -> &'static str {
        match self {
            Self::Posix => "$?",
            Self::Fish => "$status",
        }
    }

    /// The full line written to the PTY.
    ///
    /// The leading `echo` prints the start marker right before the command
    /// runs. In the typed text a quote splits the sentinel from the tag, so the
    /// shell's echo of this line (however readline wraps it) never contains
    /// the start marker, and the sentinel is followed by a status variable
    /// rather than digits.
    pub fn command_line(self, command: &str, sentinel: &str) -> String {
        format!(
            "echo '{}'{} ; {} ; echo {}{}\n",
            sentinel,
            START_TAG,
            command,
            sentinel,
            self.status_variable()
        )
    }

    /// Line printed just before the command's own output
    pub fn start_marker(self, sentinel: &str) -> String {
        format!("{}{}", sentinel, START_TAG)
    }

    /// What the shell prints on its way out after `exit`
    pub fn exit_notice(self) -> Option<&'static str> {
        match self {
            Self::Posix => Some("exit"),
            Self::Fish => None,
        }
    }

    /// Bytes that interrupt the foreground command
    pub fn interrupt(self) -> &'static [u8] {
        INTERRUPT
    }

    /// Run `command` with `dir` as its working directory
    pub fn in_directory(self, command: &str, dir: &Path) -> String {
        let dir = self.quote(&dir.to_string_lossy());
        match self {
            // Subshell keeps the session's own directory untouched
            Self::Posix => format!("( cd {} && {} )", dir, command),
            Self::Fish => format!("fish -c {}", self.quote(&format!("cd {}; and {}", dir, command))),
        }
    }

    /// Single-quote a word for this shell
    pub fn quote(self, word: &str) -> String {
        match self {
            Self::Posix => format!("'{}'", word.replace('\'', r"'\''")),
            Self::Fish => format!("'{}'", word.replace('\\', r"\\").replace('\'', r"\'")),
        }
    }
}
