//! Orchestration of one full run: build the graph, drive it, record artifacts.

use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::agents::coder::LlmCoder;
use crate::agents::planner::LlmPlanner;
use crate::agents::reasoner::LlmReasoner;
use crate::agents::reviewer::LlmReviewer;
use crate::agents::{
    AgentContext, CodeGenerator, LlmClient, LlmSettings, Planner, Reasoner, Reviewer,
};
use crate::core::budget::transition_limit;
use crate::core::routing::NodeKind;
use crate::core::state::WorkflowState;
use crate::graph::WorkflowGraph;
use crate::io::config::{AppConfig, ContextConfig, ReasoningConfig};
use crate::io::executor::CommandExecutor;
use crate::io::git::{Git, GitRepository, VersionControl};
use crate::io::github::{CiProvider, GhCli};
use crate::io::memory::{FileMemoryStore, MemoryStore, NoopMemoryStore};
use crate::io::prompt::PromptEngine;
use crate::io::run_log::{RunLog, TransitionRecord, llm_dir};
use crate::io::test_runner::{ShellTestRunner, TestRunner};
use crate::io::worktree::{WorkTree, WorkTreeWriter};
use crate::looping::{RunOutcome, run_loop};
use crate::nodes::WorkflowNodes;

/// Everything the nodes call out to.
pub struct Collaborators {
    pub planner: Box<dyn Planner>,
    /// Optional; without it the reasoning node is not part of the graph.
    pub reasoner: Option<Box<dyn Reasoner>>,
    pub coder: Box<dyn CodeGenerator>,
    pub reviewer: Box<dyn Reviewer>,
    pub tests: Box<dyn TestRunner>,
    pub repo: Box<dyn VersionControl>,
    pub ci: Box<dyn CiProvider>,
    pub memory: Rc<dyn MemoryStore>,
    pub worktree: Box<dyn WorkTreeWriter>,
}

impl Collaborators {
    /// LLM agents over the configured executor command, git and `gh` in `root`.
    ///
    /// `log_dir` receives the last test run's output when set.
    pub fn production(root: &Path, cfg: &AppConfig, log_dir: Option<&Path>) -> Self {
        let memory: Rc<dyn MemoryStore> = if cfg.memory.enabled {
            Rc::new(FileMemoryStore::new(root.join(&cfg.memory.path)))
        } else {
            Rc::new(NoopMemoryStore)
        };
        let llm = LlmClient::new(
            Box::new(CommandExecutor::new(cfg.llm.command.clone())),
            LlmSettings {
                workdir: root.to_path_buf(),
                scratch_dir: llm_dir(root),
                timeout: Duration::from_secs(cfg.llm.timeout_secs),
                output_limit_bytes: cfg.llm.output_limit_bytes,
            },
        );
        let ctx = Rc::new(AgentContext {
            llm,
            prompts: PromptEngine::new(),
            memory: Rc::clone(&memory),
            memory_results: cfg.memory.max_results,
        });

        let reasoner: Option<Box<dyn Reasoner>> = if cfg.enable_reasoning {
            Some(Box::new(LlmReasoner::new(Rc::clone(&ctx))))
        } else {
            None
        };
        Self {
            planner: Box::new(LlmPlanner::new(Rc::clone(&ctx))),
            reasoner,
            coder: Box::new(LlmCoder::new(Rc::clone(&ctx))),
            reviewer: Box::new(LlmReviewer::new(ctx)),
            tests: Box::new(ShellTestRunner {
                workdir: root.to_path_buf(),
                allowed_commands: cfg.tests.allowed_commands.clone(),
                timeout: Duration::from_secs(cfg.tests.timeout_secs),
                output_limit_bytes: cfg.tests.output_limit_bytes,
                log_path: log_dir.map(|dir| dir.join("tests.log")),
            }),
            repo: Box::new(GitRepository::new(
                Git::new(root),
                GhCli::new(root),
                &cfg.github.remote,
                &cfg.github.base_branch,
            )),
            ci: Box::new(GhCli::new(root)),
            memory,
            worktree: Box::new(WorkTree::new(root)),
        }
    }
}

/// Node-level settings derived from [`AppConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSettings {
    pub test_command: Vec<String>,
    pub branch_prefix: String,
    pub ci_timeout: Duration,
    pub ci_poll_interval: Duration,
    pub reasoning: ReasoningConfig,
    pub context: ContextConfig,
}

impl WorkflowSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            test_command: cfg.tests.command.clone(),
            branch_prefix: cfg.github.branch_prefix.clone(),
            ci_timeout: Duration::from_secs(cfg.ci.timeout_secs),
            ci_poll_interval: Duration::from_secs(cfg.ci.poll_interval_secs),
            reasoning: cfg.reasoning.clone(),
            context: cfg.context.clone(),
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Per-run switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub max_iterations: u32,
    pub enable_auto_fix: bool,
    pub use_reasoning: bool,
}

impl RunOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            enable_auto_fix: cfg.enable_auto_fix,
            use_reasoning: cfg.enable_reasoning,
        }
    }
}

pub struct Orchestrator {
    collab: Collaborators,
    settings: WorkflowSettings,
    graph: WorkflowGraph,
    cancel: Arc<AtomicBool>,
    run_log: Option<RunLog>,
}

impl Orchestrator {
    pub fn new(collab: Collaborators, settings: WorkflowSettings) -> Self {
        let graph = WorkflowGraph::new(collab.reasoner.is_some());
        Self {
            collab,
            settings,
            graph,
            cancel: Arc::new(AtomicBool::new(false)),
            run_log: None,
        }
    }

    /// Record transitions and the final state under `log`.
    pub fn with_run_log(mut self, log: RunLog) -> Self {
        self.run_log = Some(log);
        self
    }

    /// Flag checked before every transition; raising it ends the run as interrupted.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn run_log(&self) -> Option<&RunLog> {
        self.run_log.as_ref()
    }

    /// Drive one request to a terminal status.
    pub fn run(&self, request: &str, options: RunOptions) -> Result<RunOutcome> {
        if request.trim().is_empty() {
            bail!("request must not be empty");
        }
        if options.max_iterations == 0 {
            bail!("max_iterations must be > 0");
        }
        let initial = WorkflowState::new(request, options.max_iterations)
            .with_auto_fix(options.enable_auto_fix)
            .with_reasoning(options.use_reasoning);
        let limit = transition_limit(options.max_iterations);
        info!(
            max_iterations = options.max_iterations,
            transition_limit = limit,
            reasoning = self.graph.is_registered(NodeKind::Reason),
            "run started"
        );

        let nodes = WorkflowNodes::new(&self.collab, &self.settings);
        let outcome = run_loop(
            &self.graph,
            &nodes,
            initial,
            limit,
            &self.cancel,
            |seq, node, state| {
                let Some(log) = &self.run_log else {
                    return;
                };
                if let Err(err) = log.record_transition(&TransitionRecord::capture(seq, node, state)) {
                    warn!(err = %format!("{err:#}"), "failed to record transition");
                }
            },
        )?;

        if let Some(log) = &self.run_log
            && let Err(err) = log.write_final_state(&outcome.state)
        {
            warn!(err = %format!("{err:#}"), "failed to write final state");
        }
        Ok(outcome)
    }
}
