//! Merge policy for reasoning output into an existing plan.

use crate::core::types::{AgentRole, CandidateStep, Plan, ReasoningNotes, ReasoningPlan, Step};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeThresholds {
    /// Above this confidence candidate steps replace the plan's steps.
    pub replace: f64,
    /// Above this (and not above `replace`) candidate steps are prepended.
    pub merge: f64,
}

impl Default for MergeThresholds {
    fn default() -> Self {
        Self {
            replace: 0.7,
            merge: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Replaced,
    Prepended,
    Unchanged,
}

/// Infer the owning agent from free action text.
pub fn infer_agent(action: &str) -> AgentRole {
    let action = action.to_lowercase();
    if action.contains("test") {
        AgentRole::Tester
    } else if action.contains("review") {
        AgentRole::Reviewer
    } else {
        AgentRole::Coder
    }
}

/// Normalize a reasoning candidate into a `{agent, action, files, dependencies}` step.
pub fn normalize_candidate(candidate: &CandidateStep) -> Step {
    let description = candidate.description.trim();
    let conclusion = candidate.conclusion.trim();
    let action = match (description.is_empty(), conclusion.is_empty()) {
        (false, false) => format!("{description}: {conclusion}"),
        (false, true) => description.to_string(),
        (true, _) => conclusion.to_string(),
    };
    let agent = candidate.agent.unwrap_or_else(|| infer_agent(&action));
    let analysis = candidate.analysis.trim();
    Step {
        agent,
        action,
        files: candidate.files.clone().unwrap_or_default(),
        dependencies: candidate.dependencies.clone().unwrap_or_default(),
        analysis: (!analysis.is_empty()).then(|| analysis.to_string()),
    }
}

/// Apply `reasoning` to `plan` according to its confidence.
///
/// A reply without a usable step never touches the plan.
pub fn merge_reasoning(
    plan: &mut Plan,
    reasoning: &ReasoningPlan,
    thresholds: MergeThresholds,
) -> MergeOutcome {
    let candidates: Vec<Step> = reasoning
        .steps
        .iter()
        .map(normalize_candidate)
        .filter(|step| !step.action.is_empty())
        .collect();
    if candidates.is_empty() {
        return MergeOutcome::Unchanged;
    }

    let outcome = if reasoning.confidence > thresholds.replace {
        plan.steps = candidates;
        MergeOutcome::Replaced
    } else if reasoning.confidence > thresholds.merge {
        let existing = std::mem::take(&mut plan.steps);
        plan.steps = candidates.into_iter().chain(existing).collect();
        MergeOutcome::Prepended
    } else {
        return MergeOutcome::Unchanged;
    };

    if !reasoning.understanding.trim().is_empty() {
        plan.understanding = reasoning.understanding.clone();
    }
    if let Some(complexity) = reasoning.estimated_complexity {
        plan.estimated_complexity = complexity;
    }
    plan.add_risks(reasoning.risks.iter().cloned());
    plan.reasoning = Some(ReasoningNotes {
        recommendation: reasoning.recommended_approach.clone(),
        confidence: reasoning.confidence,
    });
    outcome
}
