//! Deterministic classification of planned steps.
//!
//! The execution node asks two questions of every step: is it something the
//! code generator should handle at all, and if it is a repository-control
//! instruction, which branch does it name.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{AgentRole, Step};

const GIT_KEYWORDS: [&str; 3] = ["pull", "checkout", "branch"];

static BRANCH_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:branch|checkout)\S*\s.*?(\S+[-_]\w+)").expect("branch name regex")
});

/// How the execution node treats a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Not owned by the coder: advance the cursor, nothing else.
    Skip,
    /// Pull/branch instruction without target files.
    GitControl { pull: bool },
    /// Generate code for every declared file (possibly none).
    Generate,
}

pub fn classify_step(step: &Step) -> StepKind {
    if step.agent != AgentRole::Coder {
        return StepKind::Skip;
    }
    let action = step.action.to_lowercase();
    if step.files.is_empty() && GIT_KEYWORDS.iter().any(|kw| action.contains(kw)) {
        return StepKind::GitControl {
            pull: action.contains("pull"),
        };
    }
    StepKind::Generate
}

/// Whether a step also asks for a branch, as opposed to a bare pull.
pub fn wants_branch(step: &Step) -> bool {
    let action = step.action.to_lowercase();
    action.contains("branch") || action.contains("checkout")
}

/// Branch name for a git-control step.
///
/// Looks for `branch <name>`/`checkout <name>` in the action, then in the
/// request, and falls back to `<prefix>-step-<step_number>`.
pub fn branch_name_for(step: &Step, request: &str, prefix: &str, step_number: usize) -> String {
    extract_branch_name(&step.action)
        .or_else(|| extract_branch_name(request))
        .unwrap_or_else(|| format!("{prefix}-step-{step_number}"))
}

fn extract_branch_name(text: &str) -> Option<String> {
    BRANCH_NAME
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| {
            m.as_str()
                .trim_matches(|c: char| matches!(c, '\'' | '"' | '`' | '.' | ','))
                .to_string()
        })
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_coder_steps_are_skipped() {
        let step = Step::new(AgentRole::Tester, "create branch feature-x");
        assert_eq!(classify_step(&step), StepKind::Skip);
    }

    #[test]
    fn git_keywords_without_files_are_git_control() {
        let step = Step::new(AgentRole::Coder, "Pull latest and create branch feat-health");
        assert_eq!(classify_step(&step), StepKind::GitControl { pull: true });

        let step = Step::new(AgentRole::Coder, "checkout a new branch");
        assert_eq!(classify_step(&step), StepKind::GitControl { pull: false });
    }

    #[test]
    fn git_keywords_with_files_still_generate() {
        let step = Step::new(AgentRole::Coder, "update branch handling").with_files(["git.py"]);
        assert_eq!(classify_step(&step), StepKind::Generate);
    }

    #[test]
    fn branch_name_comes_from_action_first() {
        let step = Step::new(AgentRole::Coder, "Create branch feature/health-check");
        assert_eq!(
            branch_name_for(&step, "request mentions branch other-name", "pl", 1),
            "feature/health-check"
        );
    }

    #[test]
    fn branch_name_falls_back_to_request_then_prefix() {
        let step = Step::new(AgentRole::Coder, "create a branch");
        assert_eq!(
            branch_name_for(&step, "please checkout 'fix_login'", "pl", 2),
            "fix_login"
        );
        assert_eq!(branch_name_for(&step, "add endpoint", "pl", 2), "pl-step-2");
    }
}
