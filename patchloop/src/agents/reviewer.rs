//! Review agent.

use std::rc::Rc;

use anyhow::Result;
use tracing::{info, instrument};

use crate::agents::{AgentContext, Reviewer};
use crate::core::decode::decode_review;
use crate::core::types::ReviewVerdict;

pub struct LlmReviewer {
    ctx: Rc<AgentContext>,
}

impl LlmReviewer {
    pub fn new(ctx: Rc<AgentContext>) -> Self {
        Self { ctx }
    }
}

impl Reviewer for LlmReviewer {
    #[instrument(skip_all, fields(file_path))]
    fn review_code(&self, code: &str, file_path: &str, context: &str) -> Result<ReviewVerdict> {
        let prompt = self.ctx.prompts.render_reviewer(code, file_path, context)?;
        let reply = self.ctx.llm.complete("reviewer", prompt)?;
        let verdict = decode_review(&reply);
        info!(approved = verdict.approved, issues = verdict.issues.len(), "review decoded");
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Severity;
    use crate::test_support::scripted_agent_context;

    #[test]
    fn critical_issue_blocks_approval() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (ctx, _) = scripted_agent_context(
            temp.path(),
            vec![r#"{"approved": true, "issues": [{"severity": "critical", "type": "security", "description": "eval on input"}]}"#],
        );
        let verdict = LlmReviewer::new(ctx)
            .review_code("eval(x)", "a.py", "")
            .expect("review");
        assert_eq!(verdict.issues[0].severity, Severity::Critical);
        assert!(!verdict.passes());
    }
}
