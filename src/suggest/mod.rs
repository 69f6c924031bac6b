//! Suggestions Module
//!
//! Next-command suggestions are produced by an external collaborator. The
//! session only hands it recent history and the working directory, and treats
//! any failure as "no suggestions".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What a collaborator gets to work with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionContext {
    /// Most recent commands, oldest first
    pub previous_commands: Vec<String>,
    pub current_directory: String,
}

/// Produces candidate next commands
#[async_trait]
pub trait SuggestionCollaborator: Send + Sync {
    async fn suggest(
        &self,
        partial_command: &str,
        context: &SuggestionContext,
    ) -> anyhow::Result<Vec<String>>;
}

/// Never suggests anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSuggestions;

#[async_trait]
impl SuggestionCollaborator for NoSuggestions {
    async fn suggest(&self, _partial: &str, _context: &SuggestionContext) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Prefix matches against recent history, most recent first
#[derive(Debug, Clone, Copy)]
pub struct HistorySuggester {
    max_results: usize,
}

impl HistorySuggester {
    pub fn new(max_results: usize) -> Self {
        Self { max_results }
    }
}

impl Default for HistorySuggester {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl SuggestionCollaborator for HistorySuggester {
    async fn suggest(&self, partial: &str, context: &SuggestionContext) -> anyhow::Result<Vec<String>> {
        let partial = partial.trim_start();
        let mut suggestions: Vec<String> = Vec::new();

        for command in context.previous_commands.iter().rev() {
            if command.starts_with(partial) && command != partial && !suggestions.contains(command) {
                suggestions.push(command.clone());
            }
            if suggestions.len() >= self.max_results {
                break;
            }
        }

        Ok(suggestions)
    }
}
