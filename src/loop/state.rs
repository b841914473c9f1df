//! Iteration state persistence
//!
//! `.agent_state.json` is written after every iteration epilogue so a
//! restarted session resumes exactly where the last completed iteration
//! left off.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Recent-action ring bound
const HISTORY_LIMIT: usize = 10;

/// Per-session mutable state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IterationState {
    pub iteration: u64,
    pub consecutive_errors: u32,
    pub is_first_run: bool,
    pub has_run_manager_first: bool,
    pub recent_history: Vec<String>,
}

impl Default for IterationState {
    fn default() -> Self {
        Self {
            iteration: 0,
            consecutive_errors: 0,
            is_first_run: true,
            has_run_manager_first: false,
            recent_history: Vec::new(),
        }
    }
}

impl IterationState {
    /// Load the state file; a fresh default when absent or unreadable.
    /// Returns whether the state was actually resumed.
    pub fn load(path: &Path) -> (Self, bool) {
        if !path.exists() {
            return (Self::default(), false);
        }

        match std::fs::read_to_string(path).map_err(|e| e.to_string()).and_then(|content| {
            serde_json::from_str::<Self>(&content).map_err(|e| e.to_string())
        }) {
            Ok(state) => {
                info!("Resumed state from {} (Iteration {})", path.display(), state.iteration);
                (state, true)
            }
            Err(e) => {
                warn!("Failed to load agent state: {}", e);
                (Self::default(), false)
            }
        }
    }

    /// Write the state file; failures are logged, not fatal.
    pub fn save(&self, path: &Path) {
        match serde_json::to_string_pretty(self) {
            Ok(content) => {
                if let Err(e) = std::fs::write(path, content) {
                    warn!("Failed to save agent state: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize agent state: {}", e),
        }
    }

    /// Append actions to the recent ring, keeping the last ten.
    pub fn record_actions(&mut self, actions: &[String]) {
        self.recent_history.extend(actions.iter().cloned());
        if self.recent_history.len() > HISTORY_LIMIT {
            let overflow = self.recent_history.len() - HISTORY_LIMIT;
            self.recent_history.drain(..overflow);
        }
    }
}
