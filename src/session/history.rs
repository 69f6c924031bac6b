//! Command history
//!
//! Ordered record of commands that completed with a known exit status.

use parking_lot::RwLock;
use std::collections::VecDeque;

pub struct HistoryLog {
    entries: RwLock<VecDeque<String>>,
    /// Oldest entries are dropped beyond this many
    limit: usize,
}

impl HistoryLog {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }

    pub fn append(&self, command: impl Into<String>) {
        let mut entries = self.entries.write();
        entries.push_back(command.into());
        while entries.len() > self.limit {
            entries.pop_front();
        }
    }

    /// The last `n` commands, oldest first
    pub fn recent(&self, n: usize) -> Vec<String> {
        let entries = self.entries.read();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Every retained command, oldest first
    pub fn entries(&self) -> Vec<String> {
        self.entries.read().iter().cloned().collect()
    }

    pub fn last(&self) -> Option<String> {
        self.entries.read().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(1000)
    }
}
