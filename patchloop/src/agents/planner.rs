//! Planning agent.

use std::rc::Rc;

use anyhow::Result;
use tracing::{info, instrument};

use crate::agents::{AgentContext, Planner};
use crate::core::decode::decode_plan;
use crate::core::types::Plan;

pub struct LlmPlanner {
    ctx: Rc<AgentContext>,
}

impl LlmPlanner {
    pub fn new(ctx: Rc<AgentContext>) -> Self {
        Self { ctx }
    }
}

impl Planner for LlmPlanner {
    #[instrument(skip_all)]
    fn plan(&self, request: &str, repo_context: &str) -> Result<Plan> {
        let memory = self.ctx.recall(request);
        let prompt = self
            .ctx
            .prompts
            .render_planner(request, repo_context, &memory)?;
        let reply = self.ctx.llm.complete("planner", prompt)?;
        let plan = decode_plan(&reply, request);
        info!(steps = plan.steps.len(), complexity = ?plan.estimated_complexity, "plan decoded");
        Ok(plan)
    }
}
