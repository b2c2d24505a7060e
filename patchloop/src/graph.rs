//! Workflow graph: registered nodes, allowed edges, and routing dispatch.
//!
//! The graph owns no behavior. Node bodies live in [`crate::nodes`] and every
//! routing decision is one of the pure functions in `core::routing`; this
//! module wires them together and refuses edges into unregistered nodes.

use anyhow::{Result, bail};

use crate::core::routing::{self, NodeKind, Transition};
use crate::core::state::WorkflowState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowGraph {
    nodes: Vec<NodeKind>,
}

impl WorkflowGraph {
    /// Build the graph. The reasoning node only exists when a reasoner is available.
    pub fn new(reasoning_available: bool) -> Self {
        let nodes = NodeKind::ALL
            .into_iter()
            .filter(|node| reasoning_available || *node != NodeKind::Reason)
            .collect();
        Self { nodes }
    }

    pub fn entry(&self) -> NodeKind {
        NodeKind::Plan
    }

    pub fn nodes(&self) -> &[NodeKind] {
        &self.nodes
    }

    pub fn is_registered(&self, node: NodeKind) -> bool {
        self.nodes.contains(&node)
    }

    /// Every destination `from` can route to, including the terminal edge.
    pub fn edges(from: NodeKind) -> &'static [NodeKind] {
        match from {
            NodeKind::Plan => &[NodeKind::Reason, NodeKind::Code],
            NodeKind::Reason => &[NodeKind::Code],
            NodeKind::Code => &[
                NodeKind::Code,
                NodeKind::Review,
                NodeKind::Test,
                NodeKind::Publish,
            ],
            NodeKind::Review => &[NodeKind::Test],
            NodeKind::Test => &[NodeKind::Publish, NodeKind::Fix],
            NodeKind::Publish => &[NodeKind::CiGate],
            NodeKind::CiGate => &[NodeKind::Fix],
            NodeKind::Fix => &[NodeKind::Test],
        }
    }

    /// Decide the transition out of `from` for the state it just produced.
    pub fn route(&self, from: NodeKind, state: &WorkflowState) -> Result<Transition> {
        let transition = match from {
            NodeKind::Plan => routing::after_plan(state, self.is_registered(NodeKind::Reason)),
            NodeKind::Reason => routing::after_reason(state),
            NodeKind::Code => routing::after_code(state),
            NodeKind::Review => routing::after_review(state),
            NodeKind::Test => routing::after_test(state),
            NodeKind::Publish => routing::after_publish(state),
            NodeKind::CiGate => routing::after_ci_gate(state),
            NodeKind::Fix => routing::after_fix(state),
        };
        if let Transition::Goto(next) = transition
            && !self.is_registered(next)
        {
            bail!(
                "route from {} targets unregistered node {}",
                from.as_str(),
                next.as_str()
            );
        }
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{
        AgentRole, CiOverall, CiStatus, CodeChange, Complexity, Plan, Step, TestResults,
    };

    fn state_with(steps: Vec<Step>) -> WorkflowState {
        let mut state = WorkflowState::new("add endpoint", 5).with_reasoning(true);
        state.install_plan(Plan {
            understanding: "u".to_string(),
            steps,
            estimated_complexity: Complexity::Low,
            risks: Vec::new(),
            reasoning: None,
        });
        state
    }

    #[test]
    fn reason_node_is_registered_only_with_a_reasoner() {
        assert!(WorkflowGraph::new(true).is_registered(NodeKind::Reason));
        let graph = WorkflowGraph::new(false);
        assert!(!graph.is_registered(NodeKind::Reason));
        assert_eq!(graph.nodes().len(), 7);

        let state = state_with(Vec::new());
        assert_eq!(
            graph.route(NodeKind::Plan, &state).expect("route"),
            Transition::Goto(NodeKind::Code)
        );
    }

    #[test]
    fn routing_to_unregistered_node_is_an_error() {
        let state = state_with(Vec::new());
        let mut graph = WorkflowGraph::new(true);
        graph.nodes.retain(|node| *node != NodeKind::Code);
        let err = graph.route(NodeKind::Reason, &state).unwrap_err();
        assert!(err.to_string().contains("unregistered node code"));
    }

    /// Every routed destination appears in the static edge table.
    #[test]
    fn routed_destinations_stay_within_edges() {
        let graph = WorkflowGraph::new(true);
        let mut states = vec![
            state_with(vec![Step::new(AgentRole::Coder, "write").with_files(["a.py"])]),
            state_with(vec![Step::new(AgentRole::Reviewer, "review")]),
            state_with(Vec::new()),
        ];

        let mut tested = state_with(Vec::new());
        tested.code_changes.push(CodeChange {
            file_path: "a.py".to_string(),
            code: "x".to_string(),
            task: "t".to_string(),
        });
        tested.test_results = Some(TestResults {
            success: false,
            output: "boom".to_string(),
            command: Vec::new(),
        });
        tested.ci_status = Some(CiStatus {
            overall: CiOverall::Failure,
            checks: Vec::new(),
        });
        states.push(tested.clone());
        tested.iterations = 4;
        states.push(tested);

        for state in &states {
            for from in NodeKind::ALL {
                if let Transition::Goto(next) = graph.route(from, state).expect("route") {
                    assert!(
                        WorkflowGraph::edges(from).contains(&next),
                        "{} -> {} not in edge table",
                        from.as_str(),
                        next.as_str()
                    );
                }
            }
        }
    }
}
