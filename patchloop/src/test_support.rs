//! Test-only collaborators: scripted agents, in-memory repository and CI.
//!
//! Every fake records its calls in a shared [`CallLog`] as `"<op>"` or
//! `"<op>:<target>"` entries so tests can assert on ordering and counts.
//! Fakes are cheap `Clone` handles over shared state; box one clone into
//! [`Collaborators`] and keep another to inspect afterwards.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::agents::{
    AgentContext, CodeGenerator, LlmClient, LlmSettings, Planner, Reasoner, Reviewer,
};
use crate::core::types::{
    AgentRole, CheckRun, CiStatus, CodeChange, Complexity, DebugAnalysis, GitOutput, Plan,
    PullRequest, ReasoningPlan, ReviewVerdict, Step, TestResults,
};
use crate::io::executor::{ExecRequest, Executor};
use crate::io::git::{VersionControl, resolve_in_repo};
use crate::io::github::CiProvider;
use crate::io::memory::{FileMemoryStore, MemoryRecord, MemoryStore, rank_records, render_records};
use crate::io::prompt::PromptEngine;
use crate::io::run_log::llm_dir;
use crate::io::test_runner::TestRunner;
use crate::io::worktree::WorkTreeWriter;
use crate::orchestrator::{Collaborators, WorkflowSettings};

pub type CallLog = Rc<RefCell<Vec<String>>>;

pub fn call_log() -> CallLog {
    Rc::new(RefCell::new(Vec::new()))
}

fn record(log: &CallLog, entry: impl Into<String>) {
    log.borrow_mut().push(entry.into());
}

/// Number of log entries equal to `op` or starting with `"<op>:"`.
pub fn count_calls(log: &CallLog, op: &str) -> usize {
    let prefix = format!("{op}:");
    log.borrow()
        .iter()
        .filter(|entry| *entry == op || entry.starts_with(&prefix))
        .count()
}

pub fn plan_of(steps: Vec<Step>) -> Plan {
    Plan {
        understanding: "scripted plan".to_string(),
        steps,
        estimated_complexity: Complexity::Low,
        risks: Vec::new(),
        reasoning: None,
    }
}

pub fn coder_step(action: &str, files: &[&str]) -> Step {
    Step::new(AgentRole::Coder, action).with_files(files.iter().copied())
}

pub fn reviewer_step(action: &str) -> Step {
    Step::new(AgentRole::Reviewer, action)
}

pub fn tester_step(action: &str) -> Step {
    Step::new(AgentRole::Tester, action)
}

fn check(name: &str, completed: bool, conclusion: Option<&str>) -> CheckRun {
    CheckRun {
        name: name.to_string(),
        completed,
        conclusion: conclusion.map(str::to_string),
        url: None,
    }
}

pub fn passing_ci() -> CiStatus {
    CiStatus::from_checks(vec![check("build", true, Some("success"))])
}

pub fn failing_ci() -> CiStatus {
    CiStatus::from_checks(vec![
        check("build", true, Some("success")),
        check("test", true, Some("failure")),
    ])
}

pub fn pending_ci() -> CiStatus {
    CiStatus::from_checks(vec![check("build", false, None)])
}

/// Settings with a short CI deadline and no poll delay.
pub fn fast_settings() -> WorkflowSettings {
    WorkflowSettings {
        test_command: vec!["pytest".to_string()],
        ci_timeout: Duration::from_millis(200),
        ci_poll_interval: Duration::from_millis(1),
        ..WorkflowSettings::default()
    }
}

/// Executor that answers with queued replies and captures prompts.
pub struct ScriptedExecutor {
    replies: RefCell<VecDeque<String>>,
    prompts: Rc<RefCell<Vec<String>>>,
}

impl ScriptedExecutor {
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: RefCell::new(replies.into_iter().map(str::to_string).collect()),
            prompts: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn prompts(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.prompts)
    }
}

impl Executor for ScriptedExecutor {
    fn exec(&self, request: &ExecRequest) -> Result<()> {
        self.prompts.borrow_mut().push(request.prompt.clone());
        let reply = self
            .replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted reply left"))?;
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&request.output_path, reply)
            .with_context(|| format!("write {}", request.output_path.display()))
    }
}

/// Agent context over a [`ScriptedExecutor`], with file-backed memory in `root`.
///
/// Returns the captured prompts alongside the context.
pub fn scripted_agent_context(
    root: &Path,
    replies: Vec<&str>,
) -> (Rc<AgentContext>, Rc<RefCell<Vec<String>>>) {
    let executor = ScriptedExecutor::new(replies);
    let prompts = executor.prompts();
    let llm = LlmClient::new(
        Box::new(executor),
        LlmSettings {
            workdir: root.to_path_buf(),
            scratch_dir: llm_dir(root),
            timeout: Duration::from_secs(5),
            output_limit_bytes: 100_000,
        },
    );
    let ctx = AgentContext {
        llm,
        prompts: PromptEngine::new(),
        memory: Rc::new(FileMemoryStore::new(root.join(".patchloop/memory.jsonl"))),
        memory_results: 5,
    };
    (Rc::new(ctx), prompts)
}

#[derive(Clone)]
pub struct ScriptedPlanner {
    pub plan: Plan,
    log: CallLog,
}

impl ScriptedPlanner {
    pub fn new(plan: Plan, log: CallLog) -> Self {
        Self { plan, log }
    }
}

impl Planner for ScriptedPlanner {
    fn plan(&self, _request: &str, _repo_context: &str) -> Result<Plan> {
        record(&self.log, "plan");
        Ok(self.plan.clone())
    }
}

#[derive(Clone)]
pub struct ScriptedReasoner {
    pub reasoning: ReasoningPlan,
    pub analysis: DebugAnalysis,
    log: CallLog,
}

impl ScriptedReasoner {
    pub fn new(reasoning: ReasoningPlan, analysis: DebugAnalysis, log: CallLog) -> Self {
        Self {
            reasoning,
            analysis,
            log,
        }
    }
}

impl Reasoner for ScriptedReasoner {
    fn complex_planning(&self, _request: &str, _repo_context: &str) -> Result<ReasoningPlan> {
        record(&self.log, "reason");
        Ok(self.reasoning.clone())
    }

    fn debug_complex_issue(
        &self,
        _description: &str,
        _logs: &str,
        _code_context: &str,
    ) -> Result<DebugAnalysis> {
        record(&self.log, "debug");
        Ok(self.analysis.clone())
    }
}

/// Coder producing predictable text; fixes append the first error line.
#[derive(Clone)]
pub struct FakeCoder {
    log: CallLog,
    /// Error instructions passed to `fix_code`, in call order.
    pub fix_instructions: Rc<RefCell<Vec<String>>>,
}

impl FakeCoder {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fix_instructions: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl CodeGenerator for FakeCoder {
    fn generate_code(
        &self,
        task: &str,
        file_path: &str,
        _existing: Option<&str>,
        _context: &str,
    ) -> Result<String> {
        record(&self.log, format!("generate:{file_path}"));
        Ok(format!("# {task}\n"))
    }

    fn fix_code(&self, error: &str, file_path: &str, existing: &str) -> Result<String> {
        record(&self.log, format!("fix:{file_path}"));
        self.fix_instructions.borrow_mut().push(error.to_string());
        let first = error.lines().next().unwrap_or_default();
        Ok(format!("{existing}# fixed: {first}\n"))
    }
}

#[derive(Clone)]
pub struct FakeReviewer {
    pub approve: bool,
    /// Context passed with each review, in call order.
    pub contexts: Rc<RefCell<Vec<String>>>,
    log: CallLog,
}

impl FakeReviewer {
    pub fn new(approve: bool, log: CallLog) -> Self {
        Self {
            approve,
            contexts: Rc::new(RefCell::new(Vec::new())),
            log,
        }
    }
}

impl Reviewer for FakeReviewer {
    fn review_code(&self, _code: &str, file_path: &str, context: &str) -> Result<ReviewVerdict> {
        record(&self.log, format!("review:{file_path}"));
        self.contexts.borrow_mut().push(context.to_string());
        Ok(ReviewVerdict {
            approved: self.approve,
            issues: Vec::new(),
            overall_quality: (if self.approve { "good" } else { "poor" }).to_string(),
        })
    }
}

/// Test runner answering with queued outcomes, repeating the last one.
#[derive(Clone)]
pub struct ScriptedTests {
    outcomes: Rc<RefCell<VecDeque<bool>>>,
    last: Rc<Cell<bool>>,
    log: CallLog,
}

impl ScriptedTests {
    pub fn new(outcomes: &[bool], log: CallLog) -> Self {
        Self {
            outcomes: Rc::new(RefCell::new(outcomes.iter().copied().collect())),
            last: Rc::new(Cell::new(outcomes.last().copied().unwrap_or(true))),
            log,
        }
    }
}

impl TestRunner for ScriptedTests {
    fn run_tests(&self, command: &[String]) -> Result<TestResults> {
        record(&self.log, "tests");
        let success = self
            .outcomes
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| self.last.get());
        let output = if success {
            "3 passed in 0.12s".to_string()
        } else {
            "FAILED tests/test_api.py::test_health - AssertionError: 404 != 200\n1 failed".to_string()
        };
        Ok(TestResults {
            success,
            output,
            command: command.to_vec(),
        })
    }
}

/// What the fake repository saw.
#[derive(Debug, Default)]
pub struct RepoRecord {
    pub files: BTreeMap<String, String>,
    pub branches: Vec<String>,
    pub commits: Vec<(String, Vec<String>)>,
    pub pushes: Vec<String>,
    /// `(title, body, head)` of every pull request request.
    pub pull_requests: Vec<(String, String, String)>,
}

#[derive(Clone)]
pub struct FakeRepo {
    pub record: Rc<RefCell<RepoRecord>>,
    pub branch_ok: bool,
    pub pull_output: GitOutput,
    pub pull_request: Option<PullRequest>,
    log: CallLog,
}

impl FakeRepo {
    pub fn new(log: CallLog) -> Self {
        Self {
            record: Rc::new(RefCell::new(RepoRecord::default())),
            branch_ok: true,
            pull_output: GitOutput {
                success: true,
                output: "Already up to date.".to_string(),
            },
            pull_request: Some(PullRequest {
                number: 7,
                url: "https://github.com/acme/app/pull/7".to_string(),
            }),
            log,
        }
    }

    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.record
            .borrow_mut()
            .files
            .insert(path.to_string(), contents.to_string());
        self
    }
}

impl VersionControl for FakeRepo {
    fn pull_latest(&self) -> Result<GitOutput> {
        record(&self.log, "pull");
        Ok(self.pull_output.clone())
    }

    fn create_branch(&self, name: &str) -> Result<bool> {
        record(&self.log, format!("branch:{name}"));
        if self.branch_ok {
            self.record.borrow_mut().branches.push(name.to_string());
        }
        Ok(self.branch_ok)
    }

    fn commit_changes(&self, message: &str, files: &[String]) -> Result<bool> {
        record(&self.log, "commit");
        self.record
            .borrow_mut()
            .commits
            .push((message.to_string(), files.to_vec()));
        Ok(!files.is_empty())
    }

    fn push_branch(&self, name: &str) -> Result<bool> {
        record(&self.log, format!("push:{name}"));
        self.record.borrow_mut().pushes.push(name.to_string());
        Ok(true)
    }

    fn get_file_contents(&self, path: &str) -> Result<Option<String>> {
        resolve_in_repo(Path::new("."), path)?;
        Ok(self.record.borrow().files.get(path).cloned())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        Ok(self.record.borrow().files.keys().cloned().collect())
    }

    fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
    ) -> Result<Option<PullRequest>> {
        record(&self.log, "pr");
        self.record.borrow_mut().pull_requests.push((
            title.to_string(),
            body.to_string(),
            head.to_string(),
        ));
        Ok(self.pull_request.clone())
    }
}

/// CI answering with queued statuses, repeating the last one.
#[derive(Clone)]
pub struct ScriptedCi {
    statuses: Rc<RefCell<VecDeque<CiStatus>>>,
    last: Rc<RefCell<CiStatus>>,
    pub logs: String,
    log: CallLog,
}

impl ScriptedCi {
    pub fn new(statuses: Vec<CiStatus>, log: CallLog) -> Self {
        let last = statuses.last().cloned().unwrap_or_else(passing_ci);
        Self {
            statuses: Rc::new(RefCell::new(statuses.into())),
            last: Rc::new(RefCell::new(last)),
            logs: "Check: test\nStatus: failure\nURL: n/a".to_string(),
            log,
        }
    }
}

impl CiProvider for ScriptedCi {
    fn ci_status(&self, pr_number: u64) -> Result<CiStatus> {
        record(&self.log, format!("ci_status:{pr_number}"));
        let next = self.statuses.borrow_mut().pop_front();
        Ok(next.unwrap_or_else(|| self.last.borrow().clone()))
    }

    fn ci_logs(&self, pr_number: u64) -> Result<String> {
        record(&self.log, format!("ci_logs:{pr_number}"));
        Ok(self.logs.clone())
    }
}

/// Memory kept in a vector; `failing` makes every call error.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    pub records: Rc<RefCell<Vec<MemoryRecord>>>,
    pub failing: bool,
}

impl InMemoryStore {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }
}

impl MemoryStore for InMemoryStore {
    fn relevant_context(&self, query: &str, max_results: usize) -> Result<String> {
        if self.failing {
            return Err(anyhow!("memory backend unavailable"));
        }
        let records = self.records.borrow();
        Ok(render_records(&rank_records(&records, query, max_results)))
    }

    fn store(&self, record: MemoryRecord) -> Result<()> {
        if self.failing {
            return Err(anyhow!("memory backend unavailable"));
        }
        self.records.borrow_mut().push(record);
        Ok(())
    }
}

#[derive(Clone)]
pub struct RecordingWorkTree {
    pub applied: Rc<RefCell<Vec<CodeChange>>>,
    log: CallLog,
}

impl RecordingWorkTree {
    pub fn new(log: CallLog) -> Self {
        Self {
            applied: Rc::new(RefCell::new(Vec::new())),
            log,
        }
    }
}

impl WorkTreeWriter for RecordingWorkTree {
    fn apply(&self, changes: &[CodeChange]) -> Result<()> {
        record(&self.log, format!("apply:{}", changes.len()));
        self.applied.borrow_mut().extend_from_slice(changes);
        Ok(())
    }
}

/// One of every fake, sharing a call log. Defaults: tests and CI pass, PR #7.
#[derive(Clone)]
pub struct Fakes {
    pub log: CallLog,
    pub planner: ScriptedPlanner,
    pub reasoner: Option<ScriptedReasoner>,
    pub coder: FakeCoder,
    pub reviewer: FakeReviewer,
    pub tests: ScriptedTests,
    pub repo: FakeRepo,
    pub ci: ScriptedCi,
    pub memory: InMemoryStore,
    pub worktree: RecordingWorkTree,
}

impl Fakes {
    pub fn new(plan: Plan) -> Self {
        let log = call_log();
        Self {
            planner: ScriptedPlanner::new(plan, Rc::clone(&log)),
            reasoner: None,
            coder: FakeCoder::new(Rc::clone(&log)),
            reviewer: FakeReviewer::new(true, Rc::clone(&log)),
            tests: ScriptedTests::new(&[true], Rc::clone(&log)),
            repo: FakeRepo::new(Rc::clone(&log)),
            ci: ScriptedCi::new(vec![passing_ci()], Rc::clone(&log)),
            memory: InMemoryStore::default(),
            worktree: RecordingWorkTree::new(Rc::clone(&log)),
            log,
        }
    }

    pub fn with_tests(mut self, outcomes: &[bool]) -> Self {
        self.tests = ScriptedTests::new(outcomes, Rc::clone(&self.log));
        self
    }

    pub fn with_ci(mut self, statuses: Vec<CiStatus>) -> Self {
        self.ci = ScriptedCi::new(statuses, Rc::clone(&self.log));
        self
    }

    pub fn with_reasoner(mut self, reasoning: ReasoningPlan, analysis: DebugAnalysis) -> Self {
        self.reasoner = Some(ScriptedReasoner::new(
            reasoning,
            analysis,
            Rc::clone(&self.log),
        ));
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            planner: Box::new(self.planner.clone()),
            reasoner: self
                .reasoner
                .clone()
                .map(|r| Box::new(r) as Box<dyn Reasoner>),
            coder: Box::new(self.coder.clone()),
            reviewer: Box::new(self.reviewer.clone()),
            tests: Box::new(self.tests.clone()),
            repo: Box::new(self.repo.clone()),
            ci: Box::new(self.ci.clone()),
            memory: Rc::new(self.memory.clone()),
            worktree: Box::new(self.worktree.clone()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        count_calls(&self.log, op)
    }
}
