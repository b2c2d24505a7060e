//! Stable exit codes for the `patchloop` CLI.

/// The run reached a terminal status, whichever it was.
pub const OK: i32 = 0;
/// Empty request, missing credentials, invalid config, or an aborted run.
pub const INVALID: i32 = 1;
/// A second Ctrl-C arrived before the interrupted run could report.
pub const INTERRUPTED: i32 = 130;
