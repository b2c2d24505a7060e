//! Shared deterministic types for the workflow core.
//!
//! These types define stable contracts between the orchestrator and its
//! collaborators. They carry no I/O and serialize deterministically so run
//! artifacts (`final_state.json`, `transitions.jsonl`) stay diffable.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Agent role that owns a planned step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Coder,
    Tester,
    Reviewer,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Coder => "coder",
            AgentRole::Tester => "tester",
            AgentRole::Reviewer => "reviewer",
        }
    }
}

/// One planned unit of work. Immutable once planning finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub agent: AgentRole,
    pub action: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

impl Step {
    pub fn new(agent: AgentRole, action: impl Into<String>) -> Self {
        Self {
            agent,
            action: action.into(),
            files: Vec::new(),
            dependencies: Vec::new(),
            analysis: None,
        }
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

/// Notes left on a plan by the reasoning pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningNotes {
    pub recommendation: String,
    pub confidence: f64,
}

/// Ordered steps plus planning metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub understanding: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub estimated_complexity: Complexity,
    /// Kept sorted and deduplicated so the set semantics survive serialization.
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningNotes>,
}

impl Plan {
    /// Insert risks, keeping the list sorted and unique.
    pub fn add_risks<I: IntoIterator<Item = String>>(&mut self, risks: I) {
        self.risks.extend(risks);
        self.risks.sort();
        self.risks.dedup();
    }
}

/// Generated content for one file. Fix may overwrite `code`, nothing removes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChange {
    pub file_path: String,
    pub code: String,
    pub task: String,
}

/// Snapshot from the last test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResults {
    pub success: bool,
    pub output: String,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub severity: Severity,
    #[serde(default)]
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub approved: bool,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
    #[serde(default)]
    pub overall_quality: String,
}

impl ReviewVerdict {
    /// Approved and free of critical issues.
    pub fn passes(&self) -> bool {
        self.approved
            && !self
                .issues
                .iter()
                .any(|issue| issue.severity == Severity::Critical)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub file_path: String,
    pub verdict: ReviewVerdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiOverall {
    Success,
    Failure,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub completed: bool,
    /// Conclusion reported by CI (`success`, `failure`, `skipped`, ...).
    pub conclusion: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiStatus {
    pub overall: CiOverall,
    pub checks: Vec<CheckRun>,
}

impl CiStatus {
    /// Classify a set of checks; callers decide whether they are all complete.
    pub fn from_checks(checks: Vec<CheckRun>) -> Self {
        let passed = checks.iter().all(|check| {
            matches!(
                check.conclusion.as_deref(),
                Some("success") | Some("skipped") | Some("neutral")
            )
        });
        let overall = if passed {
            CiOverall::Success
        } else {
            CiOverall::Failure
        };
        Self { overall, checks }
    }

    pub fn all_completed(&self) -> bool {
        !self.checks.is_empty() && self.checks.iter().all(|check| check.completed)
    }

    pub fn timed_out(checks: Vec<CheckRun>) -> Self {
        Self {
            overall: CiOverall::Timeout,
            checks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOutput {
    pub success: bool,
    pub output: String,
}

/// A step proposed by the reasoning collaborator, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateStep {
    pub description: String,
    pub analysis: String,
    pub conclusion: String,
    pub agent: Option<AgentRole>,
    pub files: Option<Vec<String>>,
    pub dependencies: Option<Vec<String>>,
}

/// Output of `Reasoner::complex_planning`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningPlan {
    #[serde(default)]
    pub understanding: String,
    #[serde(default)]
    pub steps: Vec<CandidateStep>,
    pub confidence: f64,
    #[serde(default)]
    pub estimated_complexity: Option<Complexity>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub recommended_approach: String,
}

/// Output of `Reasoner::debug_complex_issue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugAnalysis {
    pub root_cause: String,
    #[serde(default)]
    pub recommended_fix: String,
    pub confidence: f64,
}

/// Workflow stage where the iteration budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Code,
    Test,
    Fix,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FinalStatus {
    Success,
    CiFailed,
    TestsFailed,
    BudgetExhausted { stage: Stage },
    NoChanges,
    PlanningOnly,
    PrCreated,
    RecursionLimitExceeded,
    Interrupted,
}

impl FinalStatus {
    /// Hard stops are never overwritten by a later terminal edge.
    pub fn is_hard_stop(self) -> bool {
        matches!(
            self,
            FinalStatus::BudgetExhausted { .. }
                | FinalStatus::RecursionLimitExceeded
                | FinalStatus::Interrupted
        )
    }

    pub fn is_success(self) -> bool {
        self == FinalStatus::Success
    }

    /// Stable machine-readable label.
    pub fn code(self) -> &'static str {
        match self {
            FinalStatus::Success => "success",
            FinalStatus::CiFailed => "ci_failed",
            FinalStatus::TestsFailed => "tests_failed",
            FinalStatus::BudgetExhausted { stage: Stage::Code } => "max_iterations_reached_in_code",
            FinalStatus::BudgetExhausted { stage: Stage::Test } => "max_iterations_reached_in_test",
            FinalStatus::BudgetExhausted { stage: Stage::Fix } => "max_iterations_reached_in_fix",
            FinalStatus::NoChanges => "no_changes",
            FinalStatus::PlanningOnly => "planning_completed",
            FinalStatus::PrCreated => "pr_created",
            FinalStatus::RecursionLimitExceeded => "recursion_limit_exceeded",
            FinalStatus::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FinalStatus::Success => "SUCCESS",
            FinalStatus::CiFailed => "CI FAILED (check PR for details)",
            FinalStatus::TestsFailed => "TESTS FAILED (auto-fix disabled)",
            FinalStatus::BudgetExhausted { stage: Stage::Code } => {
                "BUDGET EXHAUSTED (before code generation)"
            }
            FinalStatus::BudgetExhausted { stage: Stage::Test } => {
                "BUDGET EXHAUSTED (after testing)"
            }
            FinalStatus::BudgetExhausted { stage: Stage::Fix } => "BUDGET EXHAUSTED (during fix)",
            FinalStatus::NoChanges => "NO CHANGES NEEDED",
            FinalStatus::PlanningOnly => "PLANNING COMPLETED (no execution needed)",
            FinalStatus::PrCreated => "PR CREATED (CI unresolved)",
            FinalStatus::RecursionLimitExceeded => "RECURSION LIMIT EXCEEDED",
            FinalStatus::Interrupted => "INTERRUPTED",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_with_critical_issue_does_not_pass() {
        let verdict = ReviewVerdict {
            approved: true,
            issues: vec![ReviewIssue {
                severity: Severity::Critical,
                category: "security".to_string(),
                description: "sql injection".to_string(),
                suggestion: String::new(),
            }],
            overall_quality: "poor".to_string(),
        };
        assert!(!verdict.passes());
    }

    #[test]
    fn ci_status_counts_skipped_as_passing() {
        let status = CiStatus::from_checks(vec![
            CheckRun {
                name: "lint".to_string(),
                completed: true,
                conclusion: Some("success".to_string()),
                url: None,
            },
            CheckRun {
                name: "docs".to_string(),
                completed: true,
                conclusion: Some("skipped".to_string()),
                url: None,
            },
        ]);
        assert_eq!(status.overall, CiOverall::Success);
        assert!(status.all_completed());
    }

    #[test]
    fn final_status_serializes_with_tag() {
        let json = serde_json::to_string(&FinalStatus::BudgetExhausted { stage: Stage::Test })
            .expect("serialize");
        assert_eq!(json, r#"{"status":"budget_exhausted","stage":"test"}"#);
    }

    #[test]
    fn plan_risks_stay_unique_and_sorted() {
        let mut plan = Plan {
            understanding: String::new(),
            steps: Vec::new(),
            estimated_complexity: Complexity::Low,
            risks: vec!["b".to_string()],
            reasoning: None,
        };
        plan.add_risks(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(plan.risks, vec!["a".to_string(), "b".to_string()]);
    }
}
