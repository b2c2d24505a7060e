//! The run's single mutable record, threaded through every node.
//!
//! Nodes never hold a reference past their own call: they receive
//! `&WorkflowState`, clone it, mutate the clone and hand it back. A node that
//! fails therefore leaves the previous state untouched.

use serde::{Deserialize, Serialize};

use crate::core::types::{
    CiStatus, CodeChange, FinalStatus, Plan, ReasoningPlan, ReviewRecord, Step, TestResults,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub user_request: String,
    pub plan: Option<Plan>,
    pub reasoning: Option<ReasoningPlan>,

    pub current_step: usize,
    pub completed_steps: Vec<Step>,

    pub code_changes: Vec<CodeChange>,
    pub test_results: Option<TestResults>,
    pub review_results: Option<Vec<ReviewRecord>>,
    pub ci_status: Option<CiStatus>,

    pub iterations: u32,
    pub max_iterations: u32,
    pub enable_auto_fix: bool,
    pub use_reasoning: bool,

    pub errors: Vec<String>,

    pub branch_name: Option<String>,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,

    pub final_status: Option<FinalStatus>,
}

impl WorkflowState {
    pub fn new(user_request: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            user_request: user_request.into(),
            plan: None,
            reasoning: None,
            current_step: 0,
            completed_steps: Vec::new(),
            code_changes: Vec::new(),
            test_results: None,
            review_results: None,
            ci_status: None,
            iterations: 0,
            max_iterations,
            enable_auto_fix: true,
            use_reasoning: false,
            errors: Vec::new(),
            branch_name: None,
            pr_number: None,
            pr_url: None,
            final_status: None,
        }
    }

    pub fn with_auto_fix(mut self, enabled: bool) -> Self {
        self.enable_auto_fix = enabled;
        self
    }

    pub fn with_reasoning(mut self, enabled: bool) -> Self {
        self.use_reasoning = enabled;
        self
    }

    pub fn steps(&self) -> &[Step] {
        self.plan.as_ref().map(|p| p.steps.as_slice()).unwrap_or(&[])
    }

    /// Step at the cursor, if any remain.
    pub fn next_step(&self) -> Option<&Step> {
        self.steps().get(self.current_step)
    }

    pub fn steps_exhausted(&self) -> bool {
        self.current_step >= self.steps().len()
    }

    pub fn budget_exhausted(&self) -> bool {
        self.iterations >= self.max_iterations
    }

    /// Install a fresh plan and reset progress cursors.
    pub fn install_plan(&mut self, plan: Plan) {
        self.plan = Some(plan);
        self.current_step = 0;
        self.completed_steps.clear();
        self.iterations += 1;
    }

    /// Move past the cursor step without recording it as completed.
    pub fn skip_step(&mut self) {
        if !self.steps_exhausted() {
            self.current_step += 1;
        }
    }

    /// Move past the cursor step and record it as completed.
    pub fn complete_step(&mut self) {
        if let Some(step) = self.next_step().cloned() {
            self.completed_steps.push(step);
            self.current_step += 1;
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Close a retry cycle: optimistic error reset plus one spent iteration.
    pub fn finish_fix_attempt(&mut self) {
        self.errors.clear();
        self.iterations += 1;
    }

    /// Set the terminal status unless a hard stop is already recorded.
    pub fn finish(&mut self, status: FinalStatus) {
        match self.final_status {
            Some(existing) if existing.is_hard_stop() => {}
            _ => self.final_status = Some(status),
        }
    }

    /// Unique file paths touched by this run, in first-seen order.
    pub fn touched_files(&self) -> Vec<String> {
        let mut files: Vec<String> = Vec::new();
        for change in &self.code_changes {
            if !files.contains(&change.file_path) {
                files.push(change.file_path.clone());
            }
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AgentRole, Complexity, Stage};

    fn plan_with(steps: Vec<Step>) -> Plan {
        Plan {
            understanding: "u".to_string(),
            steps,
            estimated_complexity: Complexity::Low,
            risks: Vec::new(),
            reasoning: None,
        }
    }

    #[test]
    fn install_plan_resets_cursors_and_counts_iteration() {
        let mut state = WorkflowState::new("req", 3);
        state.current_step = 4;
        state.completed_steps.push(Step::new(AgentRole::Coder, "old"));

        state.install_plan(plan_with(vec![Step::new(AgentRole::Coder, "a")]));

        assert_eq!(state.current_step, 0);
        assert!(state.completed_steps.is_empty());
        assert_eq!(state.iterations, 1);
    }

    #[test]
    fn cursor_never_passes_step_count() {
        let mut state = WorkflowState::new("req", 3);
        state.install_plan(plan_with(vec![Step::new(AgentRole::Tester, "t")]));

        state.skip_step();
        state.skip_step();
        state.complete_step();

        assert_eq!(state.current_step, 1);
        assert!(state.completed_steps.is_empty());
    }

    #[test]
    fn finish_does_not_overwrite_hard_stop() {
        let mut state = WorkflowState::new("req", 3);
        state.finish(FinalStatus::BudgetExhausted { stage: Stage::Fix });
        state.finish(FinalStatus::BudgetExhausted { stage: Stage::Test });
        state.finish(FinalStatus::Success);
        assert_eq!(
            state.final_status,
            Some(FinalStatus::BudgetExhausted { stage: Stage::Fix })
        );
    }

    #[test]
    fn finish_is_write_wins_for_soft_statuses() {
        let mut state = WorkflowState::new("req", 3);
        state.finish(FinalStatus::CiFailed);
        state.finish(FinalStatus::Success);
        assert_eq!(state.final_status, Some(FinalStatus::Success));
    }

    #[test]
    fn touched_files_are_deduplicated_in_order() {
        let mut state = WorkflowState::new("req", 3);
        for path in ["b.py", "a.py", "b.py"] {
            state.code_changes.push(CodeChange {
                file_path: path.to_string(),
                code: String::new(),
                task: String::new(),
            });
        }
        assert_eq!(state.touched_files(), vec!["b.py", "a.py"]);
    }
}
