//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod classifier;
pub mod decode;
pub mod failures;
pub mod merge;
pub mod routing;
pub mod state;
pub mod text;
pub mod types;
