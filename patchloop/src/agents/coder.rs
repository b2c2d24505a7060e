//! Code generation agent.

use std::rc::Rc;

use anyhow::Result;
use tracing::{debug, instrument};

use crate::agents::{AgentContext, CodeGenerator};
use crate::core::decode::decode_code;

pub struct LlmCoder {
    ctx: Rc<AgentContext>,
}

impl LlmCoder {
    pub fn new(ctx: Rc<AgentContext>) -> Self {
        Self { ctx }
    }
}

impl CodeGenerator for LlmCoder {
    #[instrument(skip_all, fields(file_path))]
    fn generate_code(
        &self,
        task: &str,
        file_path: &str,
        existing: Option<&str>,
        context: &str,
    ) -> Result<String> {
        let memory = self.ctx.recall(&format!("{task} {file_path}"));
        let prompt = self
            .ctx
            .prompts
            .render_coder_generate(task, file_path, existing, context, &memory)?;
        let reply = self.ctx.llm.complete("coder", prompt)?;
        let code = decode_code(&reply);
        debug!(bytes = code.len(), "code generated");
        Ok(code)
    }

    #[instrument(skip_all, fields(file_path))]
    fn fix_code(&self, error: &str, file_path: &str, existing: &str) -> Result<String> {
        let memory = self.ctx.recall(error);
        let prompt = self
            .ctx
            .prompts
            .render_coder_fix(error, file_path, existing, &memory)?;
        let reply = self.ctx.llm.complete("fixer", prompt)?;
        let code = decode_code(&reply);
        debug!(bytes = code.len(), "code fixed");
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory::MemoryRecord;
    use crate::test_support::scripted_agent_context;

    #[test]
    fn generated_code_is_unfenced() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (ctx, prompts) =
            scripted_agent_context(temp.path(), vec!["```python\ndef health():\n    return 'ok'\n```"]);
        let code = LlmCoder::new(ctx)
            .generate_code("add health", "api/health.py", None, "")
            .expect("generate");
        assert_eq!(code, "def health():\n    return 'ok'");
        assert!(prompts.borrow()[0].contains("does not exist yet"));
    }

    #[test]
    fn fix_prompt_carries_error_and_past_fixes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (ctx, prompts) = scripted_agent_context(temp.path(), vec!["x = 2"]);
        ctx.memory
            .store(MemoryRecord::ErrorPattern {
                error: "NameError: name undefined".to_string(),
                fix: "define it".to_string(),
            })
            .expect("store");
        let code = LlmCoder::new(ctx)
            .fix_code("NameError: name 'y' is not defined", "a.py", "x = y")
            .expect("fix");
        assert_eq!(code, "x = 2");
        let sent = prompts.borrow();
        assert!(sent[0].contains("NameError: name 'y' is not defined"));
        assert!(sent[0].contains("define it"));
    }
}
