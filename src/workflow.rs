//! Completion workflow
//!
//! Runs exactly once when `PROJECT_SIGNED_OFF` is first observed on a
//! ticket-bound session: push the branch, then best-effort PR creation,
//! ticket transition, and a deduplicated comment. Push and the protected-ref
//! check gate the workflow; everything after is best-effort.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::{Result, eyre};
use tracing::{info, warn};

use crate::adapters::{PullRequestSystem, TicketSystem};
use crate::git;

/// PR body override file
pub const PR_DESCRIPTION_FILE: &str = "PR_DESCRIPTION.md";

/// Ticket comment override file
pub const COMMENT_FILE: &str = "JIRA_COMMENT.txt";

/// One-shot completion workflow for a ticket-bound session
pub struct CompletionWorkflow {
    project_dir: PathBuf,
    ticket_key: String,
    done_status: String,
    owner_repo: Option<(String, String)>,
    tickets: Arc<dyn TicketSystem>,
    prs: Option<Arc<dyn PullRequestSystem>>,
    ran: AtomicBool,
}

impl CompletionWorkflow {
    pub fn new(
        project_dir: PathBuf,
        ticket_key: String,
        done_status: String,
        owner_repo: Option<(String, String)>,
        tickets: Arc<dyn TicketSystem>,
        prs: Option<Arc<dyn PullRequestSystem>>,
    ) -> Self {
        Self {
            project_dir,
            ticket_key,
            done_status,
            owner_repo,
            tickets,
            prs,
            ran: AtomicBool::new(false),
        }
    }

    /// Run the workflow if it has not run yet. Returns whether this call
    /// performed the run.
    pub async fn run_if_needed(&self) -> bool {
        if self.ran.swap(true, Ordering::SeqCst) {
            return false;
        }

        if let Err(e) = self.run().await {
            warn!("Completion workflow aborted: {}", e);
        }
        true
    }

    async fn run(&self) -> Result<()> {
        info!("Initiating completion for ticket: {}", self.ticket_key);

        // 1. Resolve the branch; a protected ref aborts everything
        let branch = git::current_branch(&self.project_dir)
            .await
            .map_err(|e| eyre!("Failed to determine current branch: {}", e))?;
        if git::is_protected(&branch) {
            return Err(eyre!("current branch '{}' is protected", branch));
        }

        // 2. Push gates the rest of the workflow
        git::push(&self.project_dir, Some(&branch))
            .await
            .map_err(|e| eyre!("Failed to push branch: {}", e))?;

        // 3. Best-effort pull request
        let pr_link = self.create_pr(&branch).await;
        let pr_text = pr_link
            .clone()
            .unwrap_or_else(|| format!("Manual PR required (Branch: {})", branch));

        // 4. Best-effort ticket transition
        info!(
            "Transitioning ticket {} to '{}'...",
            self.ticket_key, self.done_status
        );
        if !self.tickets.transition(&self.ticket_key, &self.done_status).await {
            warn!(
                "Failed to transition ticket {} to {}. Proceeding to comment.",
                self.ticket_key, self.done_status
            );
        }

        // 5. Best-effort comment, deduplicated on the PR link
        self.add_comment(&pr_link, &pr_text).await;

        info!(
            "Ticket {} completion workflow finished. PR: {:?}",
            self.ticket_key, pr_link
        );
        Ok(())
    }

    async fn create_pr(&self, branch: &str) -> Option<String> {
        let prs = self.prs.as_ref()?;
        let (owner, repo) = match &self.owner_repo {
            Some(pair) => pair.clone(),
            None => {
                warn!("Could not determine repository info for PR creation.");
                return None;
            }
        };

        let base = match prs.repo_metadata(&owner, &repo).await {
            Some(meta) => {
                info!("Detected default branch '{}' for repo {}/{}", meta.default_branch, owner, repo);
                meta.default_branch
            }
            None => "main".to_string(),
        };

        if branch == base {
            warn!("Current branch is same as base branch ({}). Skipping PR.", base);
            return None;
        }

        let body = match std::fs::read_to_string(self.project_dir.join(PR_DESCRIPTION_FILE)) {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => format!("Automated PR for ticket {}.", self.ticket_key),
        };
        let title = format!("Fixes {}", self.ticket_key);

        prs.create(&owner, &repo, branch, &base, &title, &body).await
    }

    async fn add_comment(&self, pr_link: &Option<String>, pr_text: &str) {
        let body = match std::fs::read_to_string(self.project_dir.join(COMMENT_FILE)) {
            Ok(custom) if !custom.trim().is_empty() => {
                format!("{}\nPR: {}", custom.trim(), pr_text)
            }
            _ => format!("Agent has completed the work. Please review.\nPR: {}", pr_text),
        };

        if let Some(link) = pr_link {
            if let Some(issue) = self.tickets.get(&self.ticket_key).await {
                if issue.comments.iter().any(|c| c.contains(link)) {
                    info!(
                        "Comment with PR link {} already exists on {}. Skipping duplicate comment.",
                        link, self.ticket_key
                    );
                    return;
                }
            } else {
                warn!(
                    "Could not retrieve issue {} for duplicate check.",
                    self.ticket_key
                );
            }
        }

        self.tickets.comment(&self.ticket_key, &body).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Issue, RepoMetadata};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use tokio::process::Command;

    #[derive(Default)]
    struct MockTickets {
        comments_on_issue: Vec<String>,
        transitions: Mutex<Vec<String>>,
        comments_added: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TicketSystem for MockTickets {
        async fn get(&self, key: &str) -> Option<Issue> {
            Some(Issue {
                key: key.to_string(),
                summary: "s".to_string(),
                description: "d".to_string(),
                comments: self.comments_on_issue.clone(),
            })
        }

        async fn first_open_by_label(&self, _label: &str) -> Option<Issue> {
            None
        }

        async fn transition(&self, _key: &str, status: &str) -> bool {
            self.transitions.lock().unwrap().push(status.to_string());
            true
        }

        async fn comment(&self, _key: &str, body: &str) -> bool {
            self.comments_added.lock().unwrap().push(body.to_string());
            true
        }
    }

    struct MockPrs {
        url: Option<String>,
        created: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl PullRequestSystem for MockPrs {
        async fn create(
            &self,
            _owner: &str,
            _repo: &str,
            head: &str,
            base: &str,
            _title: &str,
            _body: &str,
        ) -> Option<String> {
            self.created.lock().unwrap().push((head.to_string(), base.to_string()));
            self.url.clone()
        }

        async fn repo_metadata(&self, _owner: &str, _repo: &str) -> Option<RepoMetadata> {
            Some(RepoMetadata {
                default_branch: "main".to_string(),
            })
        }
    }

    async fn git(args: &[&str], dir: &Path) {
        Command::new("git").args(args).current_dir(dir).output().await.unwrap();
    }

    /// Work repo on an agent branch, with a bare origin push target
    async fn setup_pushable_repo() -> (tempfile::TempDir, tempfile::TempDir) {
        let work = tempdir().unwrap();
        let origin = tempdir().unwrap();

        git(&["init", "--bare"], origin.path()).await;
        git(&["init"], work.path()).await;
        git(&["config", "user.email", "t@t"], work.path()).await;
        git(&["config", "user.name", "T"], work.path()).await;
        git(&["commit", "--allow-empty", "-m", "init"], work.path()).await;
        git(&["branch", "-M", "main"], work.path()).await;
        git(
            &["remote", "add", "origin", origin.path().to_str().unwrap()],
            work.path(),
        )
        .await;
        git(&["checkout", "-b", "agent/PROJ-1-123"], work.path()).await;

        (work, origin)
    }

    fn workflow(
        dir: PathBuf,
        tickets: Arc<MockTickets>,
        prs: Arc<MockPrs>,
    ) -> CompletionWorkflow {
        CompletionWorkflow::new(
            dir,
            "PROJ-1".to_string(),
            "Code Review".to_string(),
            Some(("acme".to_string(), "widget".to_string())),
            tickets,
            Some(prs),
        )
    }

    #[tokio::test]
    async fn test_full_workflow() {
        let (work, _origin) = setup_pushable_repo().await;
        let tickets = Arc::new(MockTickets::default());
        let prs = Arc::new(MockPrs {
            url: Some("https://github.com/acme/widget/pull/7".to_string()),
            created: Mutex::new(vec![]),
        });

        let wf = workflow(work.path().to_path_buf(), tickets.clone(), prs.clone());
        assert!(wf.run_if_needed().await);

        let created = prs.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0], ("agent/PROJ-1-123".to_string(), "main".to_string()));

        assert_eq!(*tickets.transitions.lock().unwrap(), vec!["Code Review"]);

        let comments = tickets.comments_added.lock().unwrap();
        assert_eq!(comments.len(), 1);
        assert!(comments[0].contains("pull/7"));
    }

    #[tokio::test]
    async fn test_runs_only_once() {
        let (work, _origin) = setup_pushable_repo().await;
        let tickets = Arc::new(MockTickets::default());
        let prs = Arc::new(MockPrs {
            url: None,
            created: Mutex::new(vec![]),
        });

        let wf = workflow(work.path().to_path_buf(), tickets.clone(), prs);
        assert!(wf.run_if_needed().await);
        assert!(!wf.run_if_needed().await);
        assert_eq!(tickets.transitions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_protected_branch_aborts_everything() {
        let (work, _origin) = setup_pushable_repo().await;
        git(&["checkout", "main"], work.path()).await;

        let tickets = Arc::new(MockTickets::default());
        let prs = Arc::new(MockPrs {
            url: None,
            created: Mutex::new(vec![]),
        });

        let wf = workflow(work.path().to_path_buf(), tickets.clone(), prs.clone());
        wf.run_if_needed().await;

        assert!(prs.created.lock().unwrap().is_empty());
        assert!(tickets.transitions.lock().unwrap().is_empty());
        assert!(tickets.comments_added.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_comment_skipped() {
        let (work, _origin) = setup_pushable_repo().await;
        let tickets = Arc::new(MockTickets {
            comments_on_issue: vec!["Earlier note. PR: https://github.com/acme/widget/pull/7".to_string()],
            ..Default::default()
        });
        let prs = Arc::new(MockPrs {
            url: Some("https://github.com/acme/widget/pull/7".to_string()),
            created: Mutex::new(vec![]),
        });

        let wf = workflow(work.path().to_path_buf(), tickets.clone(), prs);
        wf.run_if_needed().await;

        assert!(tickets.comments_added.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pr_body_from_description_file() {
        let (work, _origin) = setup_pushable_repo().await;
        std::fs::write(work.path().join(PR_DESCRIPTION_FILE), "Custom body here").unwrap();
        std::fs::write(work.path().join(COMMENT_FILE), "Custom comment").unwrap();

        let tickets = Arc::new(MockTickets::default());
        let prs = Arc::new(MockPrs {
            url: Some("https://x/pr/1".to_string()),
            created: Mutex::new(vec![]),
        });

        let wf = workflow(work.path().to_path_buf(), tickets.clone(), prs);
        wf.run_if_needed().await;

        let comments = tickets.comments_added.lock().unwrap();
        assert!(comments[0].starts_with("Custom comment"));
        assert!(comments[0].contains("PR: https://x/pr/1"));
    }
}
