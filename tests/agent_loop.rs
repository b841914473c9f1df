//! End-to-end agent loop scenarios driven by the mock backend

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::tempdir;

use agentdaemon::adapters::NoopMetrics;
use agentdaemon::backend::{Backend, BackendError, BackendResponse};
use agentdaemon::config::Config;
use agentdaemon::control::StatusSender;
use agentdaemon::r#loop::{AgentLoop, IterationState, LoopOutcome};

/// Scripted backend that records every prompt it receives
struct RecordingBackend {
    script: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl RecordingBackend {
    fn new(script: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().rev().map(String::from).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    fn kind(&self) -> &'static str {
        "mock"
    }

    async fn run(
        &self,
        prompt: &str,
        _cwd: &Path,
        _status: Option<&StatusSender>,
    ) -> Result<BackendResponse, BackendError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.script.lock().unwrap().pop().unwrap_or_default();
        Ok(BackendResponse::text(next))
    }
}

fn test_config(dir: &Path, max_iterations: u64) -> Config {
    let mut config = Config::default();
    config.project_dir = dir.to_path_buf();
    config.backend = "mock".to_string();
    config.limits.max_iterations = Some(max_iterations);
    config.limits.auto_continue_delay_secs = 0;
    config
}

#[tokio::test]
async fn test_fresh_initialization() {
    let temp = tempdir().unwrap();
    let backend = RecordingBackend::new(vec!["```write:feature_list.json\n[]\n```", ""]);

    let mut agent = AgentLoop::new(test_config(temp.path(), 2), backend.clone(), NoopMetrics::handle());
    let outcome = agent.run().await;

    assert_eq!(outcome, LoopOutcome::IterationCapReached);
    assert!(temp.path().join("feature_list.json").exists());

    // Iteration 1 ran the initializer, iteration 2 the coder
    let prompts = backend.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("initializer"));
    assert!(prompts[1].contains("working through feature_list.json"));

    // Final persisted state reflects both iterations
    let (state, resumed) = IterationState::load(&temp.path().join(".agent_state.json"));
    assert!(resumed);
    assert_eq!(state.iteration, 2);
    assert!(!state.is_first_run);
}

#[tokio::test]
async fn test_manager_periodic() {
    let temp = tempdir().unwrap();
    std::fs::write(
        temp.path().join("feature_list.json"),
        r#"[{"name": "search", "passes": false}]"#,
    )
    .unwrap();

    let backend = RecordingBackend::new(vec!["", "", ""]);
    let mut config = test_config(temp.path(), 3);
    config.manager.frequency = 3;

    let mut agent = AgentLoop::new(config, backend.clone(), NoopMetrics::handle());
    agent.run().await;

    let prompts = backend.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[0].contains("working through feature_list.json"));
    assert!(prompts[1].contains("working through feature_list.json"));
    assert!(prompts[2].contains("engineering manager"));

    // Empty responses create no signal files
    for name in ["COMPLETED", "QA_PASSED", "PROJECT_SIGNED_OFF"] {
        assert!(!temp.path().join(name).exists(), "{} should not exist", name);
    }
}

#[tokio::test]
async fn test_qa_gates_sign_off_then_cleanup() {
    let temp = tempdir().unwrap();
    std::fs::write(
        temp.path().join("feature_list.json"),
        r#"[{"name": "search", "passes": true}]"#,
    )
    .unwrap();
    std::fs::write(temp.path().join("COMPLETED"), "").unwrap();

    let backend = RecordingBackend::new(vec![
        // QA verifies and approves
        "```bash\ntouch QA_PASSED\n```",
        // Manager signs off
        "```bash\ntouch PROJECT_SIGNED_OFF\n```",
        // Cleaner finishes up
        "```write:cleanup_report.txt\nremoved scratch files\n```",
    ]);

    let mut agent = AgentLoop::new(test_config(temp.path(), 10), backend.clone(), NoopMetrics::handle());
    let outcome = agent.run().await;

    assert_eq!(outcome, LoopOutcome::Completed);
    assert!(temp.path().join("QA_PASSED").exists());
    assert!(temp.path().join("PROJECT_SIGNED_OFF").exists());
    assert!(temp.path().join("cleanup_report.txt").exists());

    let prompts = backend.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[0].contains("QA engineer"));
    assert!(prompts[1].contains("engineering manager"));
    assert!(prompts[2].contains("cleanup agent"));
}

#[tokio::test]
async fn test_sign_off_at_cap_gets_cleanup_grace() {
    let temp = tempdir().unwrap();
    std::fs::write(temp.path().join("feature_list.json"), "[]").unwrap();
    std::fs::write(temp.path().join("PROJECT_SIGNED_OFF"), "").unwrap();

    // Already at the cap; the only allowed work is cleanup
    let backend = RecordingBackend::new(vec!["```write:cleanup_report.txt\ndone\n```"]);

    let mut config = test_config(temp.path(), 0);
    let mut state_seed = IterationState::default();
    state_seed.iteration = 0;
    state_seed.is_first_run = false;
    state_seed.save(&temp.path().join(".agent_state.json"));

    config.limits.max_iterations = Some(0);
    let mut agent = AgentLoop::new(config, backend.clone(), NoopMetrics::handle());
    let outcome = agent.run().await;

    // One grace iteration ran the cleaner, then the cap held
    assert_eq!(backend.prompts().len(), 1);
    assert!(backend.prompts()[0].contains("cleanup agent"));
    assert_eq!(outcome, LoopOutcome::IterationCapReached);
    assert!(temp.path().join("cleanup_report.txt").exists());
}

#[tokio::test]
async fn test_resume_from_state_file() {
    let temp = tempdir().unwrap();
    std::fs::write(temp.path().join("feature_list.json"), "[]").unwrap();

    let backend = RecordingBackend::new(vec![""]);
    let mut agent = AgentLoop::new(test_config(temp.path(), 1), backend, NoopMetrics::handle());
    agent.run().await;

    let saved = agent.state().clone();
    assert_eq!(saved.iteration, 1);

    // A new session resumes exactly the persisted tuple
    let resumed = AgentLoop::new(
        test_config(temp.path(), 5),
        RecordingBackend::new(vec![]),
        NoopMetrics::handle(),
    );
    assert_eq!(*resumed.state(), saved);
}

#[tokio::test]
async fn test_push_refused_on_protected_branch() {
    let temp = tempdir().unwrap();
    for args in [
        vec!["init"],
        vec!["config", "user.email", "t@t"],
        vec!["config", "user.name", "T"],
        vec!["commit", "--allow-empty", "-m", "init"],
        vec!["branch", "-M", "main"],
    ] {
        tokio::process::Command::new("git")
            .args(&args)
            .current_dir(temp.path())
            .output()
            .await
            .unwrap();
    }

    let result = agentdaemon::git::push(temp.path(), None).await;
    assert!(matches!(result, Err(agentdaemon::git::GitError::ProtectedBranch(_))));
}
