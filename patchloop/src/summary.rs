//! End-of-run report printed by the CLI.

use std::fmt::Write as _;

use serde::Serialize;

use crate::core::types::FinalStatus;
use crate::looping::RunOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: Option<String>,
    pub status: Option<FinalStatus>,
    /// Stable label, `"unknown"` when no terminal status was recorded.
    pub status_code: String,
    pub iterations: u32,
    pub transitions: usize,
    pub files_touched: Vec<String>,
    pub errors: Vec<String>,
    pub branch_name: Option<String>,
    pub pr_url: Option<String>,
}

impl RunSummary {
    pub fn from_outcome(outcome: &RunOutcome, run_id: Option<&str>) -> Self {
        let state = &outcome.state;
        Self {
            run_id: run_id.map(str::to_string),
            status: state.final_status,
            status_code: state
                .final_status
                .map(FinalStatus::code)
                .unwrap_or("unknown")
                .to_string(),
            iterations: state.iterations,
            transitions: outcome.trace.len(),
            files_touched: state.touched_files(),
            errors: state.errors.clone(),
            branch_name: state.branch_name.clone(),
            pr_url: state.pr_url.clone(),
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let status = self
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let _ = writeln!(out, "Status: {status}");
        if let Some(run_id) = &self.run_id {
            let _ = writeln!(out, "Run: {run_id}");
        }
        let _ = writeln!(
            out,
            "Iterations: {} ({} transitions)",
            self.iterations, self.transitions
        );
        if self.files_touched.is_empty() {
            let _ = writeln!(out, "Files changed: none");
        } else {
            let _ = writeln!(out, "Files changed:");
            for file in &self.files_touched {
                let _ = writeln!(out, "  - {file}");
            }
        }
        if let Some(branch) = &self.branch_name {
            let _ = writeln!(out, "Branch: {branch}");
        }
        if let Some(url) = &self.pr_url {
            let _ = writeln!(out, "Pull request: {url}");
        }
        if !self.errors.is_empty() {
            let _ = writeln!(out, "Errors ({}):", self.errors.len());
            for err in &self.errors {
                let first_line = err.lines().next().unwrap_or_default();
                let _ = writeln!(out, "  - {first_line}");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::routing::NodeKind;
    use crate::core::state::WorkflowState;
    use crate::core::types::{CodeChange, Stage};
    use crate::looping::LoopStop;

    fn outcome(status: FinalStatus) -> RunOutcome {
        let mut state = WorkflowState::new("add health endpoint", 3);
        state.iterations = 3;
        for path in ["api/health.py", "api/health.py", "tests/test_health.py"] {
            state.code_changes.push(CodeChange {
                file_path: path.to_string(),
                code: "x".to_string(),
                task: "t".to_string(),
            });
        }
        state.record_error("Tests failed: 1 failed\nmore detail");
        state.finish(status);
        RunOutcome {
            state,
            trace: vec![NodeKind::Plan, NodeKind::Code, NodeKind::Test],
            stop: LoopStop::Finished,
        }
    }

    #[test]
    fn text_report_lists_status_files_and_first_error_lines() {
        let summary = RunSummary::from_outcome(
            &outcome(FinalStatus::BudgetExhausted { stage: Stage::Test }),
            Some("run-1"),
        );
        let text = summary.render_text();
        assert!(text.starts_with("Status: BUDGET EXHAUSTED (after testing)\nRun: run-1\n"));
        assert!(text.contains("Iterations: 3 (3 transitions)"));
        assert!(text.contains("  - api/health.py\n  - tests/test_health.py\n"));
        assert!(text.contains("Errors (1):\n  - Tests failed: 1 failed\n"));
        assert!(!text.contains("more detail"));
    }

    #[test]
    fn json_carries_stable_status_code() {
        let summary = RunSummary::from_outcome(&outcome(FinalStatus::Success), None);
        let json = serde_json::to_value(&summary).expect("json");
        assert_eq!(json["status_code"], "success");
        assert_eq!(json["status"]["status"], "success");
        assert_eq!(json["files_touched"].as_array().map(Vec::len), Some(2));
    }
}
