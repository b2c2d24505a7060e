//! Git adapter and the repository capability used by the orchestrator.
//!
//! `Git` is a thin wrapper around `git` subprocess calls. `GitRepository`
//! combines it with local file reads and the GitHub CLI to provide the
//! [`VersionControl`] capability.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::types::{GitOutput, PullRequest};
use crate::io::github::GhCli;

/// Repository operations the workflow depends on.
///
/// Operation failures (rejected push, refused PR) are values; `Err` is
/// reserved for infrastructure problems such as a missing `git` binary.
pub trait VersionControl {
    fn pull_latest(&self) -> Result<GitOutput>;
    fn create_branch(&self, name: &str) -> Result<bool>;
    fn commit_changes(&self, message: &str, files: &[String]) -> Result<bool>;
    fn push_branch(&self, name: &str) -> Result<bool>;
    fn get_file_contents(&self, path: &str) -> Result<Option<String>>;
    fn list_files(&self) -> Result<Vec<String>>;
    fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
    ) -> Result<Option<PullRequest>>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// `git pull <remote> <branch>`; a failed pull is reported, not raised.
    #[instrument(skip_all, fields(remote, branch))]
    pub fn pull(&self, remote: &str, branch: &str) -> Result<GitOutput> {
        let output = self.run(&["pull", remote, branch])?;
        let result = to_git_output(&output);
        if !result.success {
            warn!(remote, branch, "git pull failed");
        }
        Ok(result)
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<bool> {
        debug!(branch, "creating and checking out new branch");
        let output = self.run(&["checkout", "-b", branch])?;
        Ok(self.report("checkout -b", &output))
    }

    /// Stage the given paths.
    pub fn add_paths(&self, paths: &[String]) -> Result<bool> {
        if paths.is_empty() {
            return Ok(true);
        }
        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        let output = self.run(&args)?;
        Ok(self.report("add", &output))
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        let output = self.run(&["commit", "-m", message])?;
        Ok(self.report("commit", &output))
    }

    #[instrument(skip_all, fields(remote, branch))]
    pub fn push(&self, remote: &str, branch: &str) -> Result<bool> {
        let output = self.run(&["push", "--set-upstream", remote, branch])?;
        Ok(self.report("push", &output))
    }

    /// Tracked files, in git's order.
    pub fn ls_files(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["ls-files"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    fn report(&self, what: &str, output: &Output) -> bool {
        if output.status.success() {
            return true;
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(command = what, stderr = %stderr.trim(), "git command failed");
        false
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn to_git_output(output: &Output) -> GitOutput {
    let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stderr.trim());
    }
    GitOutput {
        success: output.status.success(),
        output: text,
    }
}

/// Production [`VersionControl`]: git CLI, the working tree, and `gh`.
pub struct GitRepository {
    git: Git,
    gh: GhCli,
    remote: String,
    base_branch: String,
}

impl GitRepository {
    pub fn new(git: Git, gh: GhCli, remote: &str, base_branch: &str) -> Self {
        Self {
            git,
            gh,
            remote: remote.to_string(),
            base_branch: base_branch.to_string(),
        }
    }
}

impl VersionControl for GitRepository {
    fn pull_latest(&self) -> Result<GitOutput> {
        self.git.pull(&self.remote, &self.base_branch)
    }

    fn create_branch(&self, name: &str) -> Result<bool> {
        self.git.checkout_new_branch(name)
    }

    fn commit_changes(&self, message: &str, files: &[String]) -> Result<bool> {
        if !self.git.add_paths(files)? {
            return Ok(false);
        }
        self.git.commit_staged(message)
    }

    fn push_branch(&self, name: &str) -> Result<bool> {
        self.git.push(&self.remote, name)
    }

    fn get_file_contents(&self, path: &str) -> Result<Option<String>> {
        let full = resolve_in_repo(self.git.workdir(), path)?;
        if !full.is_file() {
            return Ok(None);
        }
        let contents =
            fs::read(&full).with_context(|| format!("read {}", full.display()))?;
        Ok(Some(String::from_utf8_lossy(&contents).into_owned()))
    }

    fn list_files(&self) -> Result<Vec<String>> {
        self.git.ls_files()
    }

    fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
    ) -> Result<Option<PullRequest>> {
        self.gh
            .create_pull_request(title, body, head, &self.base_branch)
    }
}

/// True when `relative` is non-empty and stays inside the repository root.
pub fn is_repo_relative(relative: &str) -> bool {
    !relative.trim().is_empty()
        && !Path::new(relative).components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        })
}

/// Join a repository-relative path, refusing absolute paths and `..`.
pub fn resolve_in_repo(root: &Path, relative: &str) -> Result<PathBuf> {
    if !is_repo_relative(relative) {
        return Err(anyhow!("path escapes repository: '{relative}'"));
    }
    Ok(root.join(relative))
}
