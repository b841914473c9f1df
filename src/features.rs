//! Feature-list registry
//!
//! `feature_list.json` is written by the initializer role and drives the
//! readiness-for-manager heuristics. Unknown fields survive a rewrite.

use std::path::Path;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One feature record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,

    #[serde(default)]
    pub passes: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The ordered feature registry
#[derive(Debug, Clone, Default)]
pub struct FeatureList {
    pub features: Vec<Feature>,
}

impl FeatureList {
    /// Load the registry; Ok(None) when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).context("Failed to read feature list")?;
        let features: Vec<Feature> = serde_json::from_str(&content).context("Failed to parse feature list")?;
        debug!(count = features.len(), "FeatureList::load: parsed");
        Ok(Some(Self { features }))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.features).context("Failed to render feature list")?;
        std::fs::write(path, content).context("Failed to write feature list")?;
        Ok(())
    }

    /// True when the registry is non-empty and every feature passes
    pub fn all_passing(&self) -> bool {
        !self.features.is_empty() && self.features.iter().all(|f| f.passes)
    }

    pub fn passing_count(&self) -> usize {
        self.features.iter().filter(|f| f.passes).count()
    }

    /// Mark a feature `completed`; returns whether anything changed.
    pub fn mark_completed(&mut self, name: &str) -> bool {
        for feature in &mut self.features {
            if feature.name == name && feature.status.as_deref() != Some("completed") {
                info!("Marking feature '{}' as COMPLETED in feature_list.json", name);
                feature.status = Some("completed".to_string());
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> &'static str {
        r#"[
            {"name": "auth", "passes": true, "description": "login flow"},
            {"name": "search", "passes": false}
        ]"#
    }

    #[test]
    fn test_load_missing_is_none() {
        let temp = tempdir().unwrap();
        let list = FeatureList::load(&temp.path().join("feature_list.json")).unwrap();
        assert!(list.is_none());
    }

    #[test]
    fn test_load_and_counts() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("feature_list.json");
        std::fs::write(&path, sample()).unwrap();

        let list = FeatureList::load(&path).unwrap().unwrap();
        assert_eq!(list.features.len(), 2);
        assert_eq!(list.passing_count(), 1);
        assert!(!list.all_passing());
    }

    #[test]
    fn test_all_passing_requires_nonempty() {
        let empty = FeatureList::default();
        assert!(!empty.all_passing());
    }

    #[test]
    fn test_mark_completed_and_extra_fields_survive() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("feature_list.json");
        std::fs::write(&path, sample()).unwrap();

        let mut list = FeatureList::load(&path).unwrap().unwrap();
        assert!(list.mark_completed("auth"));
        assert!(!list.mark_completed("auth"));
        assert!(!list.mark_completed("missing"));
        list.save(&path).unwrap();

        let reloaded = FeatureList::load(&path).unwrap().unwrap();
        assert_eq!(reloaded.features[0].status.as_deref(), Some("completed"));
        assert_eq!(
            reloaded.features[0].extra.get("description").and_then(|v| v.as_str()),
            Some("login flow")
        );
    }
}
