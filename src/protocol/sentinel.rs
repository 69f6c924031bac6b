//! Completion sentinels
//!
//! Each invocation gets its own marker so that command output, echoed input
//! and markers left behind by abandoned commands can never be mistaken for
//! the completion of the command currently in flight.

use std::fmt;
use uuid::Uuid;

/// Fixed part of every marker
pub const SENTINEL_PREFIX: &str = "__SP_DONE_";

/// Random hex characters appended per invocation
const SUFFIX_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sentinel(String);

impl Sentinel {
    /// A fresh marker: prefix, random hex, then a `:` that separates the exit status
    pub fn generate() -> Self {
        let random = Uuid::new_v4().simple().to_string();
        Self(format!("{}{}__:", SENTINEL_PREFIX, &random[..SUFFIX_LEN]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Sentinel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
