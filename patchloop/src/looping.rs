//! Graph execution loop shared by the orchestrator and tests.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::routing::{NodeKind, Transition};
use crate::core::state::WorkflowState;
use crate::core::types::FinalStatus;
use crate::graph::WorkflowGraph;

/// Executes one node body against the current state.
pub trait NodeRunner {
    fn execute(&self, node: NodeKind, state: &WorkflowState) -> Result<WorkflowState>;
}

/// Why `run_loop` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// A terminal edge was taken.
    Finished,
    /// The transition guard tripped.
    TransitionLimit,
    /// The cancel flag was raised.
    Interrupted,
}

/// Result of driving the graph to a terminal status.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub state: WorkflowState,
    /// Executed nodes in order.
    pub trace: Vec<NodeKind>,
    pub stop: LoopStop,
}

impl RunOutcome {
    pub fn final_status(&self) -> Option<FinalStatus> {
        self.state.final_status
    }
}

/// Drive `graph` from its entry node until a terminal edge, the transition
/// limit, or cancellation.
///
/// `on_transition` sees every executed node with its 1-based sequence number
/// and the state it produced. A node error aborts the run with that error,
/// unless the cancel flag is already raised: then the run ends interrupted
/// with the state from before that node.
pub fn run_loop<R, F>(
    graph: &WorkflowGraph,
    runner: &R,
    initial: WorkflowState,
    transition_limit: usize,
    cancel: &AtomicBool,
    mut on_transition: F,
) -> Result<RunOutcome>
where
    R: NodeRunner + ?Sized,
    F: FnMut(usize, NodeKind, &WorkflowState),
{
    let mut state = initial;
    let mut node = graph.entry();
    let mut trace: Vec<NodeKind> = Vec::new();

    let stop = loop {
        if cancel.load(Ordering::SeqCst) {
            warn!(node = node.as_str(), "run interrupted");
            state.record_error(format!("Interrupted before {}", node.as_str()));
            state.finish(FinalStatus::Interrupted);
            break LoopStop::Interrupted;
        }
        if trace.len() >= transition_limit {
            warn!(limit = transition_limit, "transition limit reached");
            state.record_error(format!(
                "Recursion limit of {transition_limit} transitions reached"
            ));
            state.finish(FinalStatus::RecursionLimitExceeded);
            break LoopStop::TransitionLimit;
        }

        debug!(node = node.as_str(), seq = trace.len() + 1, "executing node");
        state = match runner.execute(node, &state) {
            Ok(next) => next,
            // An interrupt also reaches child processes; their failure is not the node's.
            Err(err) if cancel.load(Ordering::SeqCst) => {
                warn!(node = node.as_str(), err = %format!("{err:#}"), "run interrupted");
                state.record_error(format!("Interrupted during {}", node.as_str()));
                state.finish(FinalStatus::Interrupted);
                break LoopStop::Interrupted;
            }
            Err(err) => return Err(err.context(format!("{} node failed", node.as_str()))),
        };
        trace.push(node);
        on_transition(trace.len(), node, &state);

        match graph.route(node, &state)? {
            Transition::Goto(next) => node = next,
            Transition::Finish(status) => {
                state.finish(status);
                break LoopStop::Finished;
            }
        }
    };

    info!(
        status = state.final_status.map(FinalStatus::code).unwrap_or("none"),
        transitions = trace.len(),
        "run finished"
    );
    Ok(RunOutcome { state, trace, stop })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::sync::Arc;

    use anyhow::anyhow;

    use crate::core::types::{Stage, TestResults};

    /// Runner that only touches the fields routing looks at.
    struct FakeRunner {
        tests_pass: bool,
        calls: RefCell<Vec<NodeKind>>,
        fail_on: Option<NodeKind>,
        /// Raised just before `fail_on` errors, like an interrupt killing a child.
        interrupt: Option<Arc<AtomicBool>>,
    }

    impl FakeRunner {
        fn new(tests_pass: bool) -> Self {
            Self {
                tests_pass,
                calls: RefCell::new(Vec::new()),
                fail_on: None,
                interrupt: None,
            }
        }
    }

    impl NodeRunner for FakeRunner {
        fn execute(&self, node: NodeKind, state: &WorkflowState) -> Result<WorkflowState> {
            self.calls.borrow_mut().push(node);
            if self.fail_on == Some(node) {
                if let Some(flag) = &self.interrupt {
                    flag.store(true, Ordering::SeqCst);
                }
                return Err(anyhow!("boom"));
            }
            let mut next = state.clone();
            match node {
                NodeKind::Plan => next.iterations += 1,
                NodeKind::Test => {
                    next.test_results = Some(TestResults {
                        success: self.tests_pass,
                        output: String::new(),
                        command: Vec::new(),
                    });
                }
                NodeKind::Fix => next.finish_fix_attempt(),
                _ => {}
            }
            Ok(next)
        }
    }

    fn stateful(max_iterations: u32) -> WorkflowState {
        let mut state = WorkflowState::new("req", max_iterations);
        state.code_changes.push(crate::core::types::CodeChange {
            file_path: "a.py".to_string(),
            code: "x".to_string(),
            task: "t".to_string(),
        });
        state
    }

    #[test]
    fn failing_tests_stop_on_budget() {
        let runner = FakeRunner::new(false);
        let outcome = run_loop(
            &WorkflowGraph::new(false),
            &runner,
            stateful(3),
            100,
            &AtomicBool::new(false),
            |_, _, _| {},
        )
        .expect("run");

        assert_eq!(outcome.stop, LoopStop::Finished);
        assert_eq!(
            outcome.final_status(),
            Some(FinalStatus::BudgetExhausted { stage: Stage::Test })
        );
        assert_eq!(
            outcome.trace,
            vec![
                NodeKind::Plan,
                NodeKind::Code,
                NodeKind::Test,
                NodeKind::Fix,
                NodeKind::Test,
                NodeKind::Fix,
                NodeKind::Test,
            ]
        );
    }

    #[test]
    fn transition_limit_records_error_and_status() {
        let runner = FakeRunner::new(false);
        let outcome = run_loop(
            &WorkflowGraph::new(false),
            &runner,
            stateful(50),
            4,
            &AtomicBool::new(false),
            |_, _, _| {},
        )
        .expect("run");

        assert_eq!(outcome.stop, LoopStop::TransitionLimit);
        assert_eq!(outcome.trace.len(), 4);
        assert_eq!(
            outcome.final_status(),
            Some(FinalStatus::RecursionLimitExceeded)
        );
        assert!(outcome.state.errors.iter().any(|e| e.contains("Recursion limit")));
    }

    #[test]
    fn raised_cancel_flag_stops_before_next_node() {
        let runner = FakeRunner::new(false);
        let cancel = AtomicBool::new(false);
        let mut seen = Vec::new();
        let outcome = run_loop(
            &WorkflowGraph::new(false),
            &runner,
            stateful(10),
            100,
            &cancel,
            |seq, node, _| {
                seen.push((seq, node));
                if node == NodeKind::Code {
                    cancel.store(true, Ordering::SeqCst);
                }
            },
        )
        .expect("run");

        assert_eq!(outcome.stop, LoopStop::Interrupted);
        assert_eq!(outcome.final_status(), Some(FinalStatus::Interrupted));
        assert_eq!(seen, vec![(1, NodeKind::Plan), (2, NodeKind::Code)]);
        assert_eq!(runner.calls.borrow().len(), 2);
    }

    #[test]
    fn node_error_aborts_with_context() {
        let mut runner = FakeRunner::new(true);
        runner.fail_on = Some(NodeKind::Code);
        let err = run_loop(
            &WorkflowGraph::new(false),
            &runner,
            stateful(3),
            100,
            &AtomicBool::new(false),
            |_, _, _| {},
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "code node failed");
    }

    #[test]
    fn node_error_after_interrupt_keeps_last_state() {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut runner = FakeRunner::new(true);
        runner.fail_on = Some(NodeKind::Test);
        runner.interrupt = Some(Arc::clone(&cancel));
        let outcome = run_loop(
            &WorkflowGraph::new(false),
            &runner,
            stateful(5),
            100,
            &cancel,
            |_, _, _| {},
        )
        .expect("interrupted runs still return their state");

        assert_eq!(outcome.stop, LoopStop::Interrupted);
        assert_eq!(outcome.final_status(), Some(FinalStatus::Interrupted));
        assert_eq!(outcome.trace, vec![NodeKind::Plan, NodeKind::Code]);
        assert_eq!(outcome.state.iterations, 1);
        assert_eq!(outcome.state.errors, vec!["Interrupted during test"]);
    }
}
