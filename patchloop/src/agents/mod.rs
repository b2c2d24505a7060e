//! LLM-backed collaborators: planning, reasoning, code generation, review.
//!
//! Every agent renders a prompt, sends it through the shared [`LlmClient`]
//! and decodes the reply with the matching decoder from `core::decode`.
//! The traits are the seams the orchestrator depends on; tests substitute
//! scripted implementations.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::types::{DebugAnalysis, Plan, ReasoningPlan, ReviewVerdict};
use crate::io::executor::{ExecRequest, Executor, execute_and_load_text};
use crate::io::memory::MemoryStore;
use crate::io::prompt::PromptEngine;

pub mod coder;
pub mod planner;
pub mod reasoner;
pub mod reviewer;

pub trait Planner {
    fn plan(&self, request: &str, repo_context: &str) -> Result<Plan>;
}

pub trait Reasoner {
    fn complex_planning(&self, request: &str, repo_context: &str) -> Result<ReasoningPlan>;
    fn debug_complex_issue(
        &self,
        description: &str,
        logs: &str,
        code_context: &str,
    ) -> Result<DebugAnalysis>;
}

pub trait CodeGenerator {
    fn generate_code(
        &self,
        task: &str,
        file_path: &str,
        existing: Option<&str>,
        context: &str,
    ) -> Result<String>;
    fn fix_code(&self, error: &str, file_path: &str, existing: &str) -> Result<String>;
}

pub trait Reviewer {
    fn review_code(&self, code: &str, file_path: &str, context: &str) -> Result<ReviewVerdict>;
}

/// Settings for LLM invocations.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub workdir: PathBuf,
    /// Prompts, replies and executor logs land here, one numbered set per call.
    pub scratch_dir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Sends prompts through an [`Executor`] and returns the final message.
pub struct LlmClient {
    executor: Box<dyn Executor>,
    settings: LlmSettings,
    calls: Cell<u32>,
}

impl LlmClient {
    pub fn new(executor: Box<dyn Executor>, settings: LlmSettings) -> Self {
        Self {
            executor,
            settings,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.settings.scratch_dir
    }

    /// Run one completion. `role` only names the artifacts.
    pub fn complete(&self, role: &str, prompt: String) -> Result<String> {
        let seq = self.calls.get() + 1;
        self.calls.set(seq);
        let stem = format!("{seq:04}-{role}");
        let dir = &self.settings.scratch_dir;
        fs::create_dir_all(dir).with_context(|| format!("create llm dir {}", dir.display()))?;
        let prompt_path = dir.join(format!("{stem}.prompt.md"));
        fs::write(&prompt_path, &prompt)
            .with_context(|| format!("write prompt {}", prompt_path.display()))?;

        let request = ExecRequest {
            workdir: self.settings.workdir.clone(),
            prompt,
            output_path: dir.join(format!("{stem}.reply.md")),
            log_path: dir.join(format!("{stem}.log")),
            timeout: self.settings.timeout,
            output_limit_bytes: self.settings.output_limit_bytes,
            stream_path: Some(dir.join(format!("{stem}.stream.log"))),
        };
        debug!(role, seq, "llm call");
        execute_and_load_text(self.executor.as_ref(), &request)
            .with_context(|| format!("{role} llm call"))
    }
}

/// What every LLM-backed agent shares.
pub struct AgentContext {
    pub llm: LlmClient,
    pub prompts: PromptEngine,
    pub memory: Rc<dyn MemoryStore>,
    pub memory_results: usize,
}

impl AgentContext {
    /// Memory snippets for a prompt; lookup failures only cost the enrichment.
    pub fn recall(&self, query: &str) -> String {
        if self.memory_results == 0 {
            return String::new();
        }
        match self.memory.relevant_context(query, self.memory_results) {
            Ok(text) => text,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "memory lookup failed");
                String::new()
            }
        }
    }
}
