//! GitHub access through the `gh` CLI: pull requests and CI checks.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::core::types::{CheckRun, CiStatus, PullRequest};

/// CI checks for an open pull request.
pub trait CiProvider {
    fn ci_status(&self, pr_number: u64) -> Result<CiStatus>;
    fn ci_logs(&self, pr_number: u64) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct GhCli {
    workdir: PathBuf,
}

/// One entry of `gh pr checks --json name,state,bucket,link`.
#[derive(Debug, Deserialize)]
struct GhCheck {
    name: String,
    #[serde(default)]
    state: String,
    /// `pass`, `fail`, `pending`, `skipping` or `cancel`.
    #[serde(default)]
    bucket: String,
    #[serde(default)]
    link: String,
}

impl GhCheck {
    fn into_check_run(self) -> CheckRun {
        let conclusion = match self.bucket.as_str() {
            "pass" => Some("success".to_string()),
            "fail" => Some("failure".to_string()),
            "skipping" => Some("skipped".to_string()),
            "cancel" => Some("cancelled".to_string()),
            "pending" => None,
            _ if self.state.is_empty() => None,
            _ => Some(self.state.to_lowercase()),
        };
        CheckRun {
            name: self.name,
            completed: self.bucket != "pending",
            conclusion,
            url: (!self.link.is_empty()).then_some(self.link),
        }
    }
}

impl GhCli {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Open a pull request; `None` when `gh` refuses or prints no PR URL.
    #[instrument(skip_all, fields(head, base))]
    pub fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<Option<PullRequest>> {
        let output = self.run(&[
            "pr", "create", "--title", title, "--body", body, "--head", head, "--base", base,
        ])?;
        if !output.status.success() {
            warn!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "gh pr create failed"
            );
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let pr = parse_pr_url(&stdout);
        if pr.is_none() {
            warn!(stdout = %stdout.trim(), "gh pr create printed no pull request URL");
        }
        Ok(pr)
    }

    /// Current checks for a pull request. No checks reported yet is an empty list.
    #[instrument(skip_all, fields(pr_number))]
    pub fn pr_checks(&self, pr_number: u64) -> Result<Vec<CheckRun>> {
        let number = pr_number.to_string();
        // gh exits non-zero while checks are pending or failing; the JSON is still printed.
        let output = self.run(&["pr", "checks", &number, "--json", "name,state,bucket,link"])?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            debug!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "no checks reported"
            );
            return Ok(Vec::new());
        }
        parse_checks(&stdout)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("gh")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn gh {}", args.first().copied().unwrap_or_default()))
    }
}

impl CiProvider for GhCli {
    fn ci_status(&self, pr_number: u64) -> Result<CiStatus> {
        Ok(CiStatus::from_checks(self.pr_checks(pr_number)?))
    }

    fn ci_logs(&self, pr_number: u64) -> Result<String> {
        Ok(failed_check_report(&self.pr_checks(pr_number)?))
    }
}

fn parse_checks(raw: &str) -> Result<Vec<CheckRun>> {
    let checks: Vec<GhCheck> = serde_json::from_str(raw).context("parse gh pr checks json")?;
    Ok(checks.into_iter().map(GhCheck::into_check_run).collect())
}

/// Extract `{number, url}` from the URL `gh pr create` prints.
pub fn parse_pr_url(stdout: &str) -> Option<PullRequest> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("http"))
        .find_map(|url| {
            let (_, tail) = url.rsplit_once("/pull/")?;
            let number = tail.trim_end_matches('/').parse().ok()?;
            Some(PullRequest {
                number,
                url: url.to_string(),
            })
        })
}

/// `Check/Status/URL` lines for every check that did not pass.
pub fn failed_check_report(checks: &[CheckRun]) -> String {
    checks
        .iter()
        .filter(|check| {
            !matches!(
                check.conclusion.as_deref(),
                Some("success") | Some("skipped") | Some("neutral")
            )
        })
        .map(|check| {
            format!(
                "Check: {}\nStatus: {}\nURL: {}\n",
                check.name,
                check.conclusion.as_deref().unwrap_or("pending"),
                check.url.as_deref().unwrap_or("-")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CiOverall;

    #[test]
    fn parses_pr_number_from_url() {
        let pr = parse_pr_url("Creating pull request...\nhttps://github.com/o/r/pull/42\n")
            .expect("pr");
        assert_eq!(pr.number, 42);
        assert_eq!(pr.url, "https://github.com/o/r/pull/42");
        assert!(parse_pr_url("no url here").is_none());
    }

    #[test]
    fn maps_check_buckets() {
        let raw = r#"[
            {"name": "lint", "state": "SUCCESS", "bucket": "pass", "link": "https://ci/1"},
            {"name": "docs", "state": "SKIPPED", "bucket": "skipping", "link": ""},
            {"name": "unit", "state": "IN_PROGRESS", "bucket": "pending", "link": ""}
        ]"#;
        let checks = parse_checks(raw).expect("parse");
        assert_eq!(checks[0].conclusion.as_deref(), Some("success"));
        assert_eq!(checks[1].conclusion.as_deref(), Some("skipped"));
        assert!(checks[1].url.is_none());
        assert!(!checks[2].completed);

        let status = CiStatus::from_checks(checks);
        assert!(!status.all_completed());
        assert_eq!(status.overall, CiOverall::Failure);
    }

    #[test]
    fn report_lists_only_failed_checks() {
        let checks = parse_checks(
            r#"[
                {"name": "lint", "bucket": "pass"},
                {"name": "unit", "bucket": "fail", "link": "https://ci/2"}
            ]"#,
        )
        .expect("parse");
        assert_eq!(
            failed_check_report(&checks),
            "Check: unit\nStatus: failure\nURL: https://ci/2\n"
        );
    }
}
