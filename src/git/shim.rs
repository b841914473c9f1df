//! Git wrapper shim
//!
//! When installed in place of the git binary on PATH (with the real binary
//! renamed to `git.real`), push invocations touching protected refs exit
//! non-zero before any delegation. Everything else execs the real binary.

use std::process::Command;

use tracing::debug;

use super::PROTECTED_BRANCHES;

/// Name the real binary is expected under once the shim is installed
const REAL_GIT: &str = "git.real";

/// Decide whether a git invocation may proceed.
///
/// Pure so it can be tested without a repository: the caller supplies the
/// current branch. Blocks `push` when an argument names a protected branch,
/// or when the current branch is protected and no explicit branch argument
/// redirects the push.
pub fn shim_verdict(args: &[String], current_branch: Option<&str>) -> Result<(), String> {
    if args.first().map(String::as_str) != Some("push") {
        return Ok(());
    }

    for arg in args {
        if PROTECTED_BRANCHES.contains(&arg.as_str()) {
            return Err(format!(
                "Explicitly pushing to protected branch '{}' is forbidden.",
                arg
            ));
        }
    }

    if let Some(branch) = current_branch {
        if PROTECTED_BRANCHES.contains(&branch) {
            // `git push` / `git push origin` pushes the current branch
            let has_branch_arg = args[1..]
                .iter()
                .any(|arg| !arg.starts_with('-') && arg != "origin");
            if !has_branch_arg {
                return Err(format!(
                    "Attempting to push from protected branch '{}' is forbidden.",
                    branch
                ));
            }
        }
    }

    Ok(())
}

fn real_current_branch() -> Option<String> {
    let output = Command::new(REAL_GIT)
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .output()
        .ok()?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}

/// Shim entry point: apply the verdict, then delegate to the real binary.
/// Returns the exit code to use when delegation itself fails.
pub fn run(args: &[String]) -> i32 {
    debug!(?args, "shim::run: called");

    if let Err(reason) = shim_verdict(args, real_current_branch().as_deref()) {
        eprintln!("FAILED: {}", reason);
        eprintln!("Agents are not allowed to push to 'main' or 'master' branches.");
        return 1;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // exec replaces this process; reaching the code below means it failed
        let err = Command::new(REAL_GIT).args(args).exec();
        if std::env::var("GIT_SHIM_TESTING").is_ok() {
            eprintln!("DEBUG: Executing real git (mocked)");
            return 0;
        }
        eprintln!("Error: {} not found ({}). Git wrapper is not correctly installed.", REAL_GIT, err);
        1
    }

    #[cfg(not(unix))]
    {
        match Command::new(REAL_GIT).args(args).status() {
            Ok(status) => status.code().unwrap_or(1),
            Err(_) => {
                eprintln!("Error: {} not found. Git wrapper is not correctly installed.", REAL_GIT);
                1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_non_push_commands_allowed() {
        assert!(shim_verdict(&args(&["status"]), Some("main")).is_ok());
        assert!(shim_verdict(&args(&["commit", "-m", "x"]), Some("master")).is_ok());
        assert!(shim_verdict(&[], Some("main")).is_ok());
    }

    #[test]
    fn test_explicit_protected_branch_blocked() {
        let verdict = shim_verdict(&args(&["push", "origin", "main"]), Some("agent/x-1"));
        assert!(verdict.is_err());
        assert!(verdict.unwrap_err().contains("'main'"));

        assert!(shim_verdict(&args(&["push", "origin", "master"]), None).is_err());
    }

    #[test]
    fn test_bare_push_from_protected_branch_blocked() {
        assert!(shim_verdict(&args(&["push"]), Some("main")).is_err());
        assert!(shim_verdict(&args(&["push", "origin"]), Some("master")).is_err());
        assert!(shim_verdict(&args(&["push", "--force"]), Some("main")).is_err());
    }

    #[test]
    fn test_push_redirected_to_safe_branch_allowed() {
        // On main but pushing an explicit non-protected ref
        assert!(shim_verdict(&args(&["push", "origin", "agent/x-1"]), Some("main")).is_ok());
    }

    #[test]
    fn test_push_from_safe_branch_allowed() {
        assert!(shim_verdict(&args(&["push"]), Some("agent/session-5")).is_ok());
        assert!(shim_verdict(&args(&["push", "-u", "origin", "feature"]), Some("develop")).is_ok());
    }

    #[test]
    fn test_unknown_branch_state() {
        // Detached or unreadable HEAD: only explicit protected args block
        assert!(shim_verdict(&args(&["push"]), None).is_ok());
        assert!(shim_verdict(&args(&["push", "main"]), None).is_err());
    }
}
