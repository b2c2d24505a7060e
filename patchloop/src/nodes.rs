//! Node bodies of the workflow graph.
//!
//! Each node receives the current state, clones it, and returns the updated
//! clone. An `Err` from a node means an infrastructure failure (executor
//! crash, unreadable repository); workflow failures such as failing tests or
//! a rejected push are recorded on the state instead. Memory writes and
//! publish-side git operations only log on failure.

use std::thread;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::remaining_budget;
use crate::core::classifier::{StepKind, branch_name_for, classify_step, wants_branch};
use crate::core::failures::test_error_entry;
use crate::core::merge::{MergeOutcome, merge_reasoning};
use crate::core::routing::NodeKind;
use crate::core::state::WorkflowState;
use crate::core::text::truncate_chars;
use crate::core::types::{
    AgentRole, CiOverall, CiStatus, CodeChange, FinalStatus, ReviewRecord, Stage,
};
use crate::io::git::is_repo_relative;
use crate::io::memory::MemoryRecord;
use crate::io::prompt::{PromptEngine, PullRequestInputs};
use crate::looping::NodeRunner;
use crate::orchestrator::{Collaborators, WorkflowSettings};

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";
const COMMIT_SUBJECT_CHARS: usize = 50;
const PR_TITLE_CHARS: usize = 60;
const CI_LOG_CHARS: usize = 500;
const FIX_ERROR_WINDOW: usize = 3;
const DEBUG_LOG_CHARS: usize = 4000;

/// Node bodies bound to a set of collaborators.
pub struct WorkflowNodes<'a> {
    collab: &'a Collaborators,
    settings: &'a WorkflowSettings,
    prompts: PromptEngine,
}

impl NodeRunner for WorkflowNodes<'_> {
    fn execute(&self, node: NodeKind, state: &WorkflowState) -> Result<WorkflowState> {
        match node {
            NodeKind::Plan => self.plan(state),
            NodeKind::Reason => self.reason(state),
            NodeKind::Code => self.code(state),
            NodeKind::Review => self.review(state),
            NodeKind::Test => self.test(state),
            NodeKind::Publish => self.publish(state),
            NodeKind::CiGate => self.ci_gate(state),
            NodeKind::Fix => self.fix(state),
        }
    }
}

impl<'a> WorkflowNodes<'a> {
    pub fn new(collab: &'a Collaborators, settings: &'a WorkflowSettings) -> Self {
        Self {
            collab,
            settings,
            prompts: PromptEngine::new(),
        }
    }

    /// Tracked files rendered for prompts, bounded by the context settings.
    pub fn repo_context(&self) -> Result<String> {
        let limits = &self.settings.context;
        let mut sections = Vec::new();
        for path in self.collab.repo.list_files()?.iter().take(limits.max_files) {
            let Some(contents) = self.collab.repo.get_file_contents(path)? else {
                continue;
            };
            sections.push(format!(
                "File: {path}\n{}",
                truncate_chars(&contents, limits.max_chars_per_file)
            ));
        }
        Ok(sections.join(CONTEXT_SEPARATOR))
    }

    fn remember(&self, record: MemoryRecord) {
        let kind = record.kind();
        if let Err(err) = self.collab.memory.store(record) {
            warn!(kind, err = %format!("{err:#}"), "memory store failed");
        }
    }

    #[instrument(skip_all)]
    fn plan(&self, state: &WorkflowState) -> Result<WorkflowState> {
        let context = self.repo_context()?;
        let plan = self.collab.planner.plan(&state.user_request, &context)?;
        info!(steps = plan.steps.len(), complexity = ?plan.estimated_complexity, "plan ready");

        self.remember(MemoryRecord::Plan {
            request: state.user_request.clone(),
            understanding: plan.understanding.clone(),
            steps: plan.steps.iter().map(|s| s.action.clone()).collect(),
        });
        let mut next = state.clone();
        next.install_plan(plan);
        Ok(next)
    }

    #[instrument(skip_all)]
    fn reason(&self, state: &WorkflowState) -> Result<WorkflowState> {
        let Some(reasoner) = self.collab.reasoner.as_deref() else {
            return Ok(state.clone());
        };
        let context = self.repo_context()?;
        let reasoning = reasoner.complex_planning(&state.user_request, &context)?;

        let mut next = state.clone();
        let untouched = next.current_step == 0 && next.completed_steps.is_empty();
        let outcome = match next.plan.as_mut() {
            Some(plan) if untouched => {
                merge_reasoning(plan, &reasoning, self.settings.reasoning.merge_thresholds())
            }
            _ => MergeOutcome::Unchanged,
        };
        info!(confidence = reasoning.confidence, ?outcome, "reasoning applied");

        if outcome != MergeOutcome::Unchanged
            && let Some(plan) = &next.plan
        {
            self.remember(MemoryRecord::Plan {
                request: state.user_request.clone(),
                understanding: plan.understanding.clone(),
                steps: plan.steps.iter().map(|s| s.action.clone()).collect(),
            });
        }
        next.reasoning = Some(reasoning);
        Ok(next)
    }

    /// Execute the step at the cursor. Does nothing once the budget or the
    /// plan is used up, so repeated entries are harmless.
    #[instrument(skip_all, fields(step = state.current_step))]
    fn code(&self, state: &WorkflowState) -> Result<WorkflowState> {
        if state.budget_exhausted() {
            debug!("iteration budget exhausted, skipping execution");
            return Ok(state.clone());
        }
        let Some(step) = state.next_step().cloned() else {
            return Ok(state.clone());
        };

        let mut next = state.clone();
        match classify_step(&step) {
            // Reviewer steps are consumed by the review node.
            StepKind::Skip if step.agent == AgentRole::Reviewer => {}
            StepKind::Skip => {
                debug!(agent = step.agent.as_str(), "step left to its own node");
                next.skip_step();
            }
            StepKind::GitControl { pull } => {
                if pull {
                    let output = self.collab.repo.pull_latest()?;
                    if !output.success {
                        next.record_error(format!("Git pull failed: {}", output.output));
                    }
                }
                if wants_branch(&step) {
                    let name = branch_name_for(
                        &step,
                        &state.user_request,
                        &self.settings.branch_prefix,
                        state.current_step + 1,
                    );
                    if self.collab.repo.create_branch(&name)? {
                        info!(branch = %name, "branch created");
                        next.branch_name = Some(name);
                    } else {
                        next.record_error(format!("Failed to create branch: {name}"));
                    }
                }
                next.complete_step();
            }
            StepKind::Generate => {
                let changes = self.generate(&step.action, &step.files, &mut next)?;
                if !changes.is_empty() {
                    self.collab.worktree.apply(&changes)?;
                    for change in &changes {
                        self.remember(MemoryRecord::Code {
                            file_path: change.file_path.clone(),
                            task: change.task.clone(),
                            code: change.code.clone(),
                        });
                    }
                }
                info!(files = changes.len(), "step executed");
                next.code_changes.extend(changes);
                next.complete_step();
            }
        }
        Ok(next)
    }

    /// Generate every target file of a step. Paths outside the repository
    /// are recorded as errors and skipped.
    fn generate(
        &self,
        task: &str,
        files: &[String],
        state: &mut WorkflowState,
    ) -> Result<Vec<CodeChange>> {
        let (targets, invalid): (Vec<&String>, Vec<&String>) =
            files.iter().partition(|path| is_repo_relative(path));
        for path in invalid {
            warn!(path = %path, "target path outside repository");
            state.record_error(format!("Invalid target path: {path}"));
        }
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        let context = self.repo_context()?;
        let mut changes = Vec::with_capacity(targets.len());
        for file_path in targets {
            let existing = self.collab.repo.get_file_contents(file_path)?;
            let code =
                self.collab
                    .coder
                    .generate_code(task, file_path, existing.as_deref(), &context)?;
            changes.push(CodeChange {
                file_path: file_path.clone(),
                code,
                task: task.to_string(),
            });
        }
        Ok(changes)
    }

    #[instrument(skip_all, fields(changes = state.code_changes.len()))]
    fn review(&self, state: &WorkflowState) -> Result<WorkflowState> {
        let mut next = state.clone();
        if next.next_step().is_some_and(|s| s.agent == AgentRole::Reviewer) {
            next.complete_step();
        }

        let context = if state.code_changes.is_empty() {
            String::new()
        } else {
            self.repo_context()?
        };
        let mut records = Vec::with_capacity(state.code_changes.len());
        for change in &state.code_changes {
            let verdict =
                self.collab
                    .reviewer
                    .review_code(&change.code, &change.file_path, &context)?;
            records.push(ReviewRecord {
                file_path: change.file_path.clone(),
                verdict,
            });
        }

        let rejected: Vec<&str> = records
            .iter()
            .filter(|r| !r.verdict.passes())
            .map(|r| r.file_path.as_str())
            .collect();
        if rejected.is_empty() {
            info!(files = records.len(), "review passed");
        } else {
            warn!(rejected = rejected.len(), "review failed");
            next.record_error(format!("Code review failed: {}", rejected.join(", ")));
        }
        self.remember(MemoryRecord::Decision {
            topic: format!("review of {}", state.user_request),
            decision: (if rejected.is_empty() { "approved" } else { "rejected" }).to_string(),
            rationale: records
                .iter()
                .map(|r| format!("{}: {}", r.file_path, r.verdict.overall_quality))
                .collect::<Vec<_>>()
                .join("; "),
        });
        next.review_results = Some(records);
        Ok(next)
    }

    #[instrument(skip_all)]
    fn test(&self, state: &WorkflowState) -> Result<WorkflowState> {
        let results = self.collab.tests.run_tests(&self.settings.test_command)?;
        let mut next = state.clone();
        if !results.success {
            next.record_error(test_error_entry(&results.output));
        }
        info!(success = results.success, "tests evaluated");
        next.test_results = Some(results);
        Ok(next)
    }

    #[instrument(skip_all)]
    fn publish(&self, state: &WorkflowState) -> Result<WorkflowState> {
        let mut next = state.clone();
        let repo = &self.collab.repo;
        let files = state.touched_files();

        // A branch created by a plan step (or an earlier publish) is reused.
        let branch = match &state.branch_name {
            Some(existing) => existing.clone(),
            None => {
                let branch = format!("{}-{}", self.settings.branch_prefix, state.iterations);
                if repo.create_branch(&branch)? {
                    next.branch_name = Some(branch.clone());
                } else {
                    warn!(branch = %branch, "branch creation failed");
                }
                branch
            }
        };
        let message = format!(
            "patchloop: {}",
            truncate_chars(&state.user_request, COMMIT_SUBJECT_CHARS)
        );
        if !repo.commit_changes(&message, &files)? {
            warn!(files = files.len(), "commit failed");
        }
        if !repo.push_branch(&branch)? {
            warn!(branch = %branch, "push failed");
        }

        let body = self.prompts.render_pull_request(&PullRequestInputs {
            request: &state.user_request,
            understanding: state.plan.as_ref().map(|p| p.understanding.as_str()),
            files: &files,
            test_command: state.test_results.as_ref().map(|r| r.command.join(" ")),
            tests_passed: state.test_results.as_ref().is_some_and(|r| r.success),
            iterations: state.iterations,
        })?;
        let title = truncate_chars(&state.user_request, PR_TITLE_CHARS);
        match repo.create_pull_request(title, &body, &branch)? {
            Some(pr) => {
                info!(number = pr.number, url = %pr.url, "pull request opened");
                next.pr_number = Some(pr.number);
                next.pr_url = Some(pr.url);
            }
            None => warn!(branch = %branch, "pull request not created"),
        }
        Ok(next)
    }

    #[instrument(skip_all, fields(pr = state.pr_number))]
    fn ci_gate(&self, state: &WorkflowState) -> Result<WorkflowState> {
        let mut next = state.clone();
        let Some(pr_number) = state.pr_number else {
            warn!("no pull request to gate on");
            next.record_error("No PR number available for CI check");
            return Ok(next);
        };

        let ci = &self.collab.ci;
        let deadline = Instant::now() + self.settings.ci_timeout;
        let status = loop {
            let status = ci.ci_status(pr_number)?;
            if status.all_completed() {
                break status;
            }
            match remaining_budget(deadline) {
                Ok(remaining) => thread::sleep(self.settings.ci_poll_interval.min(remaining)),
                Err(_) => break CiStatus::timed_out(status.checks),
            }
        };
        info!(overall = ?status.overall, checks = status.checks.len(), "ci settled");

        if status.overall != CiOverall::Success {
            let logs = ci.ci_logs(pr_number)?;
            next.record_error(format!(
                "CI failed: {}",
                truncate_chars(&logs, CI_LOG_CHARS)
            ));
        }
        next.ci_status = Some(status);
        Ok(next)
    }

    /// One bounded repair attempt. Always spends an iteration and clears the
    /// error list, whatever the repair produced.
    #[instrument(skip_all, fields(errors = state.errors.len(), iteration = state.iterations))]
    fn fix(&self, state: &WorkflowState) -> Result<WorkflowState> {
        let mut next = state.clone();
        if state.budget_exhausted() {
            next.finish(FinalStatus::BudgetExhausted { stage: Stage::Fix });
            return Ok(next);
        }

        let instructions = match self.deep_fix_instruction(state)? {
            Some(instruction) => vec![instruction],
            None => {
                let start = state.errors.len().saturating_sub(FIX_ERROR_WINDOW);
                state.errors[start..].to_vec()
            }
        };

        let targets = latest_change_per_file(&next.code_changes);
        if !instructions.is_empty() && !targets.is_empty() {
            for instruction in &instructions {
                for &idx in &targets {
                    let change = &next.code_changes[idx];
                    let fixed =
                        self.collab
                            .coder
                            .fix_code(instruction, &change.file_path, &change.code)?;
                    next.code_changes[idx].code = fixed;
                }
            }
            let fixed: Vec<CodeChange> = targets
                .iter()
                .map(|&idx| next.code_changes[idx].clone())
                .collect();
            self.collab.worktree.apply(&fixed)?;
            for instruction in &instructions {
                self.remember(MemoryRecord::ErrorPattern {
                    error: instruction.clone(),
                    fix: format!("regenerated {} file(s)", fixed.len()),
                });
            }
            info!(files = fixed.len(), instructions = instructions.len(), "fix applied");
        }

        next.finish_fix_attempt();
        Ok(next)
    }

    /// Root-cause instruction from the reasoner, when enough errors piled up
    /// and the analysis is confident.
    fn deep_fix_instruction(&self, state: &WorkflowState) -> Result<Option<String>> {
        let cfg = &self.settings.reasoning;
        let Some(reasoner) = self.collab.reasoner.as_deref() else {
            return Ok(None);
        };
        if state.errors.len() < cfg.debug_min_errors {
            return Ok(None);
        }

        let description = state.errors.join("\n");
        let logs = state
            .test_results
            .as_ref()
            .map(|r| truncate_chars(&r.output, DEBUG_LOG_CHARS).to_string())
            .unwrap_or_default();
        let code_context = state
            .code_changes
            .iter()
            .map(|c| format!("File: {}\n{}", c.file_path, c.code))
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        let analysis = reasoner.debug_complex_issue(&description, &logs, &code_context)?;
        if analysis.confidence < cfg.debug_confidence || analysis.recommended_fix.trim().is_empty()
        {
            debug!(confidence = analysis.confidence, "debug analysis not used");
            return Ok(None);
        }
        info!(confidence = analysis.confidence, "using debug analysis");
        Ok(Some(format!(
            "Root cause: {}\nRecommended fix: {}",
            analysis.root_cause, analysis.recommended_fix
        )))
    }
}

/// Index of the last change for every distinct file, in first-seen file order.
fn latest_change_per_file(changes: &[CodeChange]) -> Vec<usize> {
    let mut order: Vec<(&str, usize)> = Vec::new();
    for (idx, change) in changes.iter().enumerate() {
        match order.iter_mut().find(|(path, _)| *path == change.file_path) {
            Some(entry) => entry.1 = idx,
            None => order.push((change.file_path.as_str(), idx)),
        }
    }
    order.into_iter().map(|(_, idx)| idx).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(path: &str, code: &str) -> CodeChange {
        CodeChange {
            file_path: path.to_string(),
            code: code.to_string(),
            task: "t".to_string(),
        }
    }

    #[test]
    fn latest_change_per_file_keeps_last_index() {
        let changes = vec![change("a.py", "1"), change("b.py", "2"), change("a.py", "3")];
        assert_eq!(latest_change_per_file(&changes), vec![2, 1]);
        assert!(latest_change_per_file(&[]).is_empty());
    }
}
