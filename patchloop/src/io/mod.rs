//! Side-effecting adapters used by the orchestrator.

pub mod config;
pub mod executor;
pub mod git;
pub mod github;
pub mod memory;
pub mod process;
pub mod prompt;
pub mod run_log;
pub mod test_runner;
pub mod worktree;
