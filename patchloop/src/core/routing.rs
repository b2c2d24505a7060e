//! Pure routing decisions between workflow nodes.
//!
//! Every function here maps a `WorkflowState` to the next [`Transition`]
//! without touching the state. Terminal edges carry the status to record, the
//! run loop applies it. The iteration ceiling is evaluated before anything else
//! in every decision that can lead to more LLM work.

use serde::{Deserialize, Serialize};

use crate::core::state::WorkflowState;
use crate::core::types::{AgentRole, CiOverall, FinalStatus, Stage};

/// Nodes of the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Plan,
    Reason,
    Code,
    Review,
    Test,
    Publish,
    CiGate,
    Fix,
}

impl NodeKind {
    pub const ALL: [NodeKind; 8] = [
        NodeKind::Plan,
        NodeKind::Reason,
        NodeKind::Code,
        NodeKind::Review,
        NodeKind::Test,
        NodeKind::Publish,
        NodeKind::CiGate,
        NodeKind::Fix,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Plan => "plan",
            NodeKind::Reason => "reason",
            NodeKind::Code => "code",
            NodeKind::Review => "review",
            NodeKind::Test => "test",
            NodeKind::Publish => "publish",
            NodeKind::CiGate => "ci_gate",
            NodeKind::Fix => "fix",
        }
    }
}

/// Outcome of a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Goto(NodeKind),
    Finish(FinalStatus),
}

pub fn after_plan(state: &WorkflowState, reasoning_registered: bool) -> Transition {
    if reasoning_registered && state.use_reasoning {
        Transition::Goto(NodeKind::Reason)
    } else {
        Transition::Goto(NodeKind::Code)
    }
}

pub fn after_reason(_state: &WorkflowState) -> Transition {
    Transition::Goto(NodeKind::Code)
}

/// Decide what follows the execution node.
///
/// Precedence, first match wins:
/// 1. ceiling reached: stop
/// 2. next unexecuted step is a reviewer step: review
/// 3. steps remain: execute the next one
/// 4. steps exhausted with no code produced: stop
/// 5. already tested and one iteration from the ceiling: publish
/// 6. otherwise: test
///
/// No edge leads back to code once tests have run, so rule 5 only fires for
/// a state assembled outside the graph (a resumed or hand-built state).
pub fn after_code(state: &WorkflowState) -> Transition {
    if state.budget_exhausted() {
        return Transition::Finish(FinalStatus::BudgetExhausted { stage: Stage::Code });
    }

    if let Some(step) = state.next_step() {
        if step.agent == AgentRole::Reviewer {
            return Transition::Goto(NodeKind::Review);
        }
        return Transition::Goto(NodeKind::Code);
    }

    if state.code_changes.is_empty() {
        let status = if state.completed_steps.is_empty() {
            FinalStatus::PlanningOnly
        } else {
            FinalStatus::NoChanges
        };
        return Transition::Finish(status);
    }

    if state.test_results.is_some() && state.iterations.saturating_add(1) >= state.max_iterations
    {
        return Transition::Goto(NodeKind::Publish);
    }

    Transition::Goto(NodeKind::Test)
}

pub fn after_review(_state: &WorkflowState) -> Transition {
    Transition::Goto(NodeKind::Test)
}

pub fn after_test(state: &WorkflowState) -> Transition {
    if state.budget_exhausted() {
        return Transition::Finish(FinalStatus::BudgetExhausted { stage: Stage::Test });
    }

    let passed = state.test_results.as_ref().is_some_and(|r| r.success);
    if passed {
        if state.pr_number.is_some() {
            return Transition::Finish(FinalStatus::PrCreated);
        }
        return Transition::Goto(NodeKind::Publish);
    }

    if state.enable_auto_fix {
        Transition::Goto(NodeKind::Fix)
    } else {
        Transition::Finish(FinalStatus::TestsFailed)
    }
}

pub fn after_publish(_state: &WorkflowState) -> Transition {
    Transition::Goto(NodeKind::CiGate)
}

pub fn after_ci_gate(state: &WorkflowState) -> Transition {
    let passed = state
        .ci_status
        .as_ref()
        .is_some_and(|ci| ci.overall == CiOverall::Success);
    if passed {
        return Transition::Finish(FinalStatus::Success);
    }
    if state.enable_auto_fix && !state.budget_exhausted() {
        return Transition::Goto(NodeKind::Fix);
    }
    Transition::Finish(FinalStatus::CiFailed)
}

/// Fix hands over to a single test evaluation unless its budget guard tripped.
pub fn after_fix(state: &WorkflowState) -> Transition {
    match state.final_status {
        Some(status) if status.is_hard_stop() => Transition::Finish(status),
        _ => Transition::Goto(NodeKind::Test),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CiStatus, CodeChange, Complexity, Plan, Step, TestResults};

    fn state_with_steps(steps: Vec<Step>, max_iterations: u32) -> WorkflowState {
        let mut state = WorkflowState::new("add endpoint", max_iterations);
        state.install_plan(Plan {
            understanding: "u".to_string(),
            steps,
            estimated_complexity: Complexity::Low,
            risks: Vec::new(),
            reasoning: None,
        });
        state
    }

    fn change(path: &str) -> CodeChange {
        CodeChange {
            file_path: path.to_string(),
            code: "x".to_string(),
            task: "t".to_string(),
        }
    }

    fn results(success: bool) -> TestResults {
        TestResults {
            success,
            output: String::new(),
            command: vec!["pytest".to_string()],
        }
    }

    #[test]
    fn plan_routes_to_reason_only_when_registered_and_enabled() {
        let state = state_with_steps(Vec::new(), 5).with_reasoning(true);
        assert_eq!(after_plan(&state, true), Transition::Goto(NodeKind::Reason));
        assert_eq!(after_plan(&state, false), Transition::Goto(NodeKind::Code));
        let state = state.with_reasoning(false);
        assert_eq!(after_plan(&state, true), Transition::Goto(NodeKind::Code));
    }

    #[test]
    fn code_checks_ceiling_before_anything_else() {
        let mut state = state_with_steps(vec![Step::new(AgentRole::Reviewer, "review")], 1);
        state.code_changes.push(change("a.py"));
        assert_eq!(
            after_code(&state),
            Transition::Finish(FinalStatus::BudgetExhausted { stage: Stage::Code })
        );
    }

    #[test]
    fn code_routes_to_review_only_for_reviewer_step() {
        let mut state = state_with_steps(
            vec![
                Step::new(AgentRole::Coder, "write"),
                Step::new(AgentRole::Reviewer, "review"),
            ],
            5,
        );
        assert_eq!(after_code(&state), Transition::Goto(NodeKind::Code));
        state.complete_step();
        assert_eq!(after_code(&state), Transition::Goto(NodeKind::Review));
    }

    #[test]
    fn empty_plan_ends_as_planning_only() {
        let state = state_with_steps(Vec::new(), 5);
        assert_eq!(
            after_code(&state),
            Transition::Finish(FinalStatus::PlanningOnly)
        );
    }

    #[test]
    fn executed_steps_without_changes_end_as_no_changes() {
        let mut state = state_with_steps(vec![Step::new(AgentRole::Coder, "create branch x-y")], 5);
        state.complete_step();
        assert_eq!(after_code(&state), Transition::Finish(FinalStatus::NoChanges));
    }

    #[test]
    fn exhausted_steps_with_changes_go_to_test_first() {
        let mut state = state_with_steps(vec![Step::new(AgentRole::Coder, "write")], 5);
        state.complete_step();
        state.code_changes.push(change("a.py"));
        assert_eq!(after_code(&state), Transition::Goto(NodeKind::Test));

        state.test_results = Some(results(false));
        assert_eq!(after_code(&state), Transition::Goto(NodeKind::Test));
    }

    #[test]
    fn near_ceiling_with_prior_tests_goes_to_publish() {
        let mut state = state_with_steps(vec![Step::new(AgentRole::Coder, "write")], 3);
        state.complete_step();
        state.code_changes.push(change("a.py"));
        state.test_results = Some(results(false));
        state.iterations = 2;
        assert_eq!(after_code(&state), Transition::Goto(NodeKind::Publish));
    }

    #[test]
    fn test_ceiling_wins_over_success() {
        let mut state = state_with_steps(Vec::new(), 2);
        state.iterations = 2;
        state.test_results = Some(results(true));
        assert_eq!(
            after_test(&state),
            Transition::Finish(FinalStatus::BudgetExhausted { stage: Stage::Test })
        );
    }

    #[test]
    fn test_success_publishes_once() {
        let mut state = state_with_steps(Vec::new(), 5);
        state.test_results = Some(results(true));
        assert_eq!(after_test(&state), Transition::Goto(NodeKind::Publish));
        state.pr_number = Some(7);
        assert_eq!(after_test(&state), Transition::Finish(FinalStatus::PrCreated));
    }

    #[test]
    fn test_failure_fixes_only_with_auto_fix() {
        let mut state = state_with_steps(Vec::new(), 5);
        state.test_results = Some(results(false));
        assert_eq!(after_test(&state), Transition::Goto(NodeKind::Fix));
        let state = state.with_auto_fix(false);
        assert_eq!(after_test(&state), Transition::Finish(FinalStatus::TestsFailed));
    }

    #[test]
    fn ci_gate_routes_by_overall_status() {
        let mut state = state_with_steps(Vec::new(), 5);
        assert_eq!(after_ci_gate(&state), Transition::Goto(NodeKind::Fix));

        state.ci_status = Some(CiStatus::from_checks(Vec::new()));
        assert_eq!(after_ci_gate(&state), Transition::Finish(FinalStatus::Success));

        state.ci_status = Some(CiStatus::timed_out(Vec::new()));
        state.iterations = 5;
        assert_eq!(after_ci_gate(&state), Transition::Finish(FinalStatus::CiFailed));
    }

    #[test]
    fn fix_returns_to_test_unless_guard_tripped() {
        let mut state = state_with_steps(Vec::new(), 1);
        state.iterations = 9;
        assert_eq!(after_fix(&state), Transition::Goto(NodeKind::Test));

        state.finish(FinalStatus::BudgetExhausted { stage: Stage::Fix });
        assert_eq!(
            after_fix(&state),
            Transition::Finish(FinalStatus::BudgetExhausted { stage: Stage::Fix })
        );
    }
}
