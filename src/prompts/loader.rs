//! Prompt loader
//!
//! Loads role templates from a project override directory (`.prompts/`) or
//! the embedded defaults, and renders them with the iteration context.

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;

/// Context for rendering prompt templates
#[derive(Debug, Clone, Default, Serialize)]
pub struct PromptContext {
    pub working_directory: String,
    pub file_tree: String,
    pub recent_actions: String,
    pub tool_grammar: String,

    // Ticket-bound sessions
    pub jira_ticket_context: String,
    pub unique_branch_suffix: String,

    // Sprint roles
    pub user_goal: String,
    pub feature_list_content: String,
    pub task_id: String,
    pub task_title: String,
    pub task_description: String,
}

impl PromptContext {
    pub fn new(working_directory: impl Into<String>) -> Self {
        Self {
            working_directory: working_directory.into(),
            tool_grammar: embedded::TOOL_GRAMMAR.to_string(),
            ..Default::default()
        }
    }
}

/// Loads and renders prompt templates
pub struct PromptLoader {
    hbs: Handlebars<'static>,
    override_dir: Option<PathBuf>,
}

impl PromptLoader {
    /// Loader with a project-local override directory (`<project>/.prompts`)
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        let override_dir = project_dir.as_ref().join(".prompts");
        let mut hbs = Handlebars::new();
        // Prompts are plain text, not HTML
        hbs.register_escape_fn(handlebars::no_escape);

        Self {
            hbs,
            override_dir: override_dir.exists().then_some(override_dir),
        }
    }

    /// Loader that only uses embedded templates (tests, workers)
    pub fn embedded_only() -> Self {
        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(handlebars::no_escape);
        Self {
            hbs,
            override_dir: None,
        }
    }

    fn load_template(&self, name: &str) -> Result<String> {
        if let Some(dir) = &self.override_dir {
            let path = dir.join(format!("{}.md", name));
            if path.exists() {
                debug!(?path, "PromptLoader: using project override");
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("Failed to read prompt override {}: {}", path.display(), e));
            }
        }

        embedded::get_embedded(name)
            .map(String::from)
            .ok_or_else(|| eyre!("Prompt template not found: {}", name))
    }

    /// Render a template by name with the given context
    pub fn render(&self, template_name: &str, context: &PromptContext) -> Result<String> {
        let template = self.load_template(template_name)?;
        self.hbs
            .render_template(&template, context)
            .map_err(|e| eyre!("Failed to render template {}: {}", template_name, e))
    }
}
