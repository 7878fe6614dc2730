use std::path::Path;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GitError {
    #[error("not a git repository: {0}")]
    NotARepo(String),
    #[error("git command failed: {0}")]
    Command(String),
}

// ---------------------------------------------------------------------------
// GitRunner trait (for testability)
// ---------------------------------------------------------------------------

/// Abstraction over git CLI operations so they can be mocked in tests.
pub trait GitRunner: Send + Sync {
    /// Run a git command in the given directory and return its output.
    fn run_git(&self, dir: &Path, args: &[&str]) -> Result<GitOutput, String>;
}

#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn ok() -> Self {
        Self {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// Real git runner that shells out to the `git` binary.
pub struct RealGitRunner;

impl GitRunner for RealGitRunner {
    fn run_git(&self, dir: &Path, args: &[&str]) -> Result<GitOutput, String> {
        let output = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| e.to_string())?;

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

fn run(git: &dyn GitRunner, dir: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
    match git.run_git(dir, args) {
        Ok(output) if output.success => Ok(output),
        Ok(output) => Err(GitError::Command(format!(
            "git {}: {}",
            args.join(" "),
            output.stderr.trim()
        ))),
        Err(err) => Err(GitError::Command(err)),
    }
}

/// Verify that `path` is inside a git working tree.
pub fn validate_git_repo(git: &dyn GitRunner, path: &Path) -> Result<(), GitError> {
    let output = git
        .run_git(path, &["rev-parse", "--is-inside-work-tree"])
        .map_err(GitError::Command)?;
    if output.success && output.stdout.trim() == "true" {
        Ok(())
    } else {
        Err(GitError::NotARepo(path.display().to_string()))
    }
}

/// Materialise a detached worktree at `worktree` based on `base`.
pub fn create_worktree(
    git: &dyn GitRunner,
    parent: &Path,
    worktree: &Path,
    base: &str,
) -> Result<(), GitError> {
    let worktree_str = worktree.to_string_lossy();
    run(
        git,
        parent,
        &["worktree", "add", "--detach", &worktree_str, base],
    )?;
    Ok(())
}

/// Create and switch to `branch` inside the worktree.
pub fn create_branch(git: &dyn GitRunner, worktree: &Path, branch: &str) -> Result<(), GitError> {
    run(git, worktree, &["checkout", "-b", branch])?;
    Ok(())
}

/// Remove a worktree registration and its directory.
pub fn remove_worktree(git: &dyn GitRunner, parent: &Path, worktree: &Path) -> Result<(), GitError> {
    let worktree_str = worktree.to_string_lossy();
    run(
        git,
        parent,
        &["worktree", "remove", "--force", &worktree_str],
    )?;
    Ok(())
}

/// Delete a branch from the parent repository.
pub fn delete_branch(git: &dyn GitRunner, parent: &Path, branch: &str) -> Result<(), GitError> {
    run(git, parent, &["branch", "-D", branch])?;
    Ok(())
}

/// Porcelain status of a working directory.
pub fn git_status(git: &dyn GitRunner, dir: &Path) -> Result<String, GitError> {
    Ok(run(git, dir, &["status", "--porcelain"])?.stdout)
}

/// Files with local modifications, parsed from porcelain status.
pub fn modified_files(git: &dyn GitRunner, dir: &Path) -> Result<Vec<String>, GitError> {
    let stdout = git_status(git, dir)?;
    Ok(stdout
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| line[3..].to_string())
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// A mock git runner that records commands and returns canned responses.
    struct MockGit {
        responses: Mutex<Vec<GitOutput>>,
        commands: Mutex<Vec<Vec<String>>>,
    }

    impl MockGit {
        fn new(responses: Vec<GitOutput>) -> Self {
            Self {
                responses: Mutex::new(responses),
                commands: Mutex::new(Vec::new()),
            }
        }

        fn commands(&self) -> Vec<Vec<String>> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl GitRunner for MockGit {
        fn run_git(&self, _dir: &Path, args: &[&str]) -> Result<GitOutput, String> {
            self.commands
                .lock()
                .unwrap()
                .push(args.iter().map(|s| s.to_string()).collect());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(GitOutput::ok())
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    #[test]
    fn validate_accepts_work_tree() {
        let git = MockGit::new(vec![GitOutput {
            success: true,
            stdout: "true\n".to_string(),
            stderr: String::new(),
        }]);
        assert!(validate_git_repo(&git, Path::new("/repo")).is_ok());
    }

    #[test]
    fn validate_rejects_non_repo() {
        let git = MockGit::new(vec![GitOutput {
            success: false,
            stdout: String::new(),
            stderr: "fatal: not a git repository".to_string(),
        }]);
        let err = validate_git_repo(&git, Path::new("/tmp/elsewhere")).unwrap_err();
        assert!(matches!(err, GitError::NotARepo(_)));
    }

    #[test]
    fn create_worktree_issues_detached_add() {
        let git = MockGit::new(vec![]);
        create_worktree(&git, Path::new("/repo"), Path::new("/sb/wt"), "main").unwrap();
        let commands = git.commands();
        assert_eq!(
            commands[0],
            vec!["worktree", "add", "--detach", "/sb/wt", "main"]
        );
    }

    #[test]
    fn failed_command_carries_stderr() {
        let git = MockGit::new(vec![GitOutput {
            success: false,
            stdout: String::new(),
            stderr: "fatal: branch exists\n".to_string(),
        }]);
        let err = create_branch(&git, Path::new("/sb/wt"), "mission/m1/1").unwrap_err();
        match err {
            GitError::Command(message) => {
                assert!(message.contains("branch exists"));
                assert!(message.contains("checkout"));
            }
            other => panic!("expected Command, got {other:?}"),
        }
    }

    #[test]
    fn modified_files_parses_porcelain() {
        let git = MockGit::new(vec![GitOutput {
            success: true,
            stdout: " M src/lib.rs\n?? new_file.rs\n".to_string(),
            stderr: String::new(),
        }]);
        let files = modified_files(&git, Path::new("/sb/wt")).unwrap();
        assert_eq!(files, vec!["src/lib.rs", "new_file.rs"]);
    }
}
