//! Reasoning agent: deliberate planning and root-cause analysis.

use std::rc::Rc;

use anyhow::Result;
use tracing::{info, instrument};

use crate::agents::{AgentContext, Reasoner};
use crate::core::decode::{decode_debug_analysis, decode_reasoning_plan};
use crate::core::types::{DebugAnalysis, ReasoningPlan};

pub struct LlmReasoner {
    ctx: Rc<AgentContext>,
}

impl LlmReasoner {
    pub fn new(ctx: Rc<AgentContext>) -> Self {
        Self { ctx }
    }
}

impl Reasoner for LlmReasoner {
    #[instrument(skip_all)]
    fn complex_planning(&self, request: &str, repo_context: &str) -> Result<ReasoningPlan> {
        let memory = self.ctx.recall(request);
        let prompt = self
            .ctx
            .prompts
            .render_reasoner_plan(request, repo_context, &memory)?;
        let reply = self.ctx.llm.complete("reasoner", prompt)?;
        let plan = decode_reasoning_plan(&reply);
        info!(steps = plan.steps.len(), confidence = plan.confidence, "reasoning decoded");
        Ok(plan)
    }

    #[instrument(skip_all)]
    fn debug_complex_issue(
        &self,
        description: &str,
        logs: &str,
        code_context: &str,
    ) -> Result<DebugAnalysis> {
        let prompt = self
            .ctx
            .prompts
            .render_debugger(description, logs, code_context)?;
        let reply = self.ctx.llm.complete("debugger", prompt)?;
        let analysis = decode_debug_analysis(&reply);
        info!(confidence = analysis.confidence, "debug analysis decoded");
        Ok(analysis)
    }
}
