//! Signal files
//!
//! Zero-byte marker files in the project directory whose presence is the
//! control state. The loop snapshots them once per iteration; selection is
//! deterministic on that snapshot.

use std::path::Path;

use tracing::{debug, warn};

use crate::features::FeatureList;

pub const COMPLETED: &str = "COMPLETED";
pub const QA_PASSED: &str = "QA_PASSED";
pub const PROJECT_SIGNED_OFF: &str = "PROJECT_SIGNED_OFF";
pub const TRIGGER_MANAGER: &str = "TRIGGER_MANAGER";
pub const HUMAN_IN_LOOP: &str = "human_in_loop.txt";
pub const CLEANUP_REPORT: &str = "cleanup_report.txt";
pub const FEATURE_LIST: &str = "feature_list.json";

/// The closed set of marker names owned by the loop
pub const SIGNAL_FILES: &[&str] = &[
    COMPLETED,
    QA_PASSED,
    PROJECT_SIGNED_OFF,
    TRIGGER_MANAGER,
    HUMAN_IN_LOOP,
    CLEANUP_REPORT,
];

/// Snapshot of signal-file presence at iteration start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalSet {
    pub completed: bool,
    pub qa_passed: bool,
    pub signed_off: bool,
    pub trigger_manager: bool,
    pub cleanup_report: bool,
    pub human_in_loop: bool,
    pub feature_list_exists: bool,
    pub all_features_pass: bool,
}

impl SignalSet {
    /// Scan the project directory. A malformed feature list reads as
    /// "not all passing".
    pub fn scan(project_dir: &Path) -> Self {
        let feature_list_path = project_dir.join(FEATURE_LIST);
        let feature_list_exists = feature_list_path.exists();

        let all_features_pass = if feature_list_exists {
            match FeatureList::load(&feature_list_path) {
                Ok(Some(list)) => list.all_passing(),
                Ok(None) => false,
                Err(e) => {
                    debug!(error = %e, "SignalSet::scan: unreadable feature list");
                    false
                }
            }
        } else {
            false
        };

        Self {
            completed: project_dir.join(COMPLETED).exists(),
            qa_passed: project_dir.join(QA_PASSED).exists(),
            signed_off: project_dir.join(PROJECT_SIGNED_OFF).exists(),
            trigger_manager: project_dir.join(TRIGGER_MANAGER).exists(),
            cleanup_report: project_dir.join(CLEANUP_REPORT).exists(),
            human_in_loop: project_dir.join(HUMAN_IN_LOOP).exists(),
            feature_list_exists,
            all_features_pass,
        }
    }
}

/// Consume the one-shot `TRIGGER_MANAGER` marker.
pub fn consume_trigger_manager(project_dir: &Path) {
    let path = project_dir.join(TRIGGER_MANAGER);
    if path.exists() {
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("Failed to consume TRIGGER_MANAGER: {}", e);
        }
    }
}

/// Remove stale completion markers from a prior aborted run.
pub fn clear_stale_signals(project_dir: &Path) {
    for name in [COMPLETED, QA_PASSED, PROJECT_SIGNED_OFF] {
        let path = project_dir.join(name);
        if path.exists() {
            debug!(%name, "clear_stale_signals: removing stale marker");
            let _ = std::fs::remove_file(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), "").unwrap();
    }

    #[test]
    fn test_scan_empty_dir() {
        let temp = tempdir().unwrap();
        let signals = SignalSet::scan(temp.path());
        assert_eq!(signals, SignalSet::default());
    }

    #[test]
    fn test_scan_markers() {
        let temp = tempdir().unwrap();
        touch(temp.path(), COMPLETED);
        touch(temp.path(), TRIGGER_MANAGER);

        let signals = SignalSet::scan(temp.path());
        assert!(signals.completed);
        assert!(signals.trigger_manager);
        assert!(!signals.signed_off);
        assert!(!signals.qa_passed);
    }

    #[test]
    fn test_scan_feature_list_passing() {
        let temp = tempdir().unwrap();
        std::fs::write(
            temp.path().join(FEATURE_LIST),
            r#"[{"name": "a", "passes": true}]"#,
        )
        .unwrap();

        let signals = SignalSet::scan(temp.path());
        assert!(signals.feature_list_exists);
        assert!(signals.all_features_pass);
    }

    #[test]
    fn test_scan_malformed_feature_list() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join(FEATURE_LIST), "not json").unwrap();

        let signals = SignalSet::scan(temp.path());
        assert!(signals.feature_list_exists);
        assert!(!signals.all_features_pass);
    }

    #[test]
    fn test_consume_trigger_manager() {
        let temp = tempdir().unwrap();
        touch(temp.path(), TRIGGER_MANAGER);

        consume_trigger_manager(temp.path());
        assert!(!temp.path().join(TRIGGER_MANAGER).exists());

        // Consuming an absent marker is a no-op
        consume_trigger_manager(temp.path());
    }

    #[test]
    fn test_clear_stale_signals() {
        let temp = tempdir().unwrap();
        touch(temp.path(), COMPLETED);
        touch(temp.path(), QA_PASSED);
        touch(temp.path(), PROJECT_SIGNED_OFF);
        touch(temp.path(), CLEANUP_REPORT);

        clear_stale_signals(temp.path());
        assert!(!temp.path().join(COMPLETED).exists());
        assert!(!temp.path().join(QA_PASSED).exists());
        assert!(!temp.path().join(PROJECT_SIGNED_OFF).exists());
        // Cleanup report is not a completion marker
        assert!(temp.path().join(CLEANUP_REPORT).exists());
    }
}
