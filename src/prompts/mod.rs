//! Prompt-role registry
//!
//! The loop depends on this registry interface; concrete prompt text comes
//! from project-local overrides or the embedded defaults.

mod embedded;
mod loader;

pub use loader::{PromptContext, PromptLoader};
