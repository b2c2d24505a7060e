//! Agentic code-modification pipeline.
//!
//! A natural-language request is planned into steps, executed by LLM-backed
//! collaborators, tested, repaired within an iteration budget, and published
//! as a pull request gated on CI. The crate keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (state, routing, decoding, merge
//!   policy). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, `gh`, process
//!   execution, memory). Each sits behind a trait so tests can substitute it.
//! - **[`agents`]**: LLM-backed planner, reasoner, coder and reviewer.
//!
//! [`orchestrator`] wires collaborators into the [`graph`] and drives it with
//! [`looping::run_loop`]; node bodies live in [`nodes`].

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod graph;
pub mod io;
pub mod logging;
pub mod looping;
pub mod nodes;
pub mod orchestrator;
pub mod summary;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
