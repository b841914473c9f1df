//! Sprint plan: the task DAG produced by the planner role

use std::path::Path;

use eyre::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Task lifecycle. BLOCKED is a derived view (unmet dependencies), never
/// persisted as progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Blocked,
    InProgress,
    Completed,
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// One planned unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,

    #[serde(default = "default_title")]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_name: Option<String>,
}

fn default_title() -> String {
    "No Title".to_string()
}

/// The sprint DAG
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SprintPlan {
    #[serde(default)]
    pub sprint_goal: String,

    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl SprintPlan {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read sprint plan")?;
        let plan: Self = serde_json::from_str(&content).context("Failed to parse sprint plan")?;
        debug!(tasks = plan.tasks.len(), "SprintPlan::load: parsed");
        Ok(plan)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to render sprint plan")?;
        std::fs::write(path, content).context("Failed to write sprint plan")?;
        Ok(())
    }
}

/// Salvage a plan JSON object from a fenced block in the planner's reply
/// when the file itself was never written.
pub fn salvage_plan_json(response: &str) -> Option<String> {
    let re = Regex::new(r"(?s)```(?:json|write:sprint_plan\.json)\n(.*?)\n```").expect("static regex");
    re.captures(response).map(|caps| caps[1].to_string())
}
