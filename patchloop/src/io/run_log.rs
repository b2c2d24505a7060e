//! Run artifacts under `.patchloop/runs/<run-id>/`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::routing::NodeKind;
use crate::core::state::WorkflowState;
use crate::io::config::{STATE_DIR, write_atomic};

/// One executed node, as written to `transitions.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub seq: usize,
    pub node: NodeKind,
    pub iterations: u32,
    pub current_step: usize,
    pub errors: usize,
    pub code_changes: usize,
}

impl TransitionRecord {
    pub fn capture(seq: usize, node: NodeKind, state: &WorkflowState) -> Self {
        Self {
            seq,
            node,
            iterations: state.iterations,
            current_step: state.current_step,
            errors: state.errors.len(),
            code_changes: state.code_changes.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunLog {
    run_id: String,
    dir: PathBuf,
}

/// Identifier for a new run: seconds since the epoch plus the process id.
pub fn new_run_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("run-{secs}-{}", std::process::id())
}

/// Directory for LLM prompts, replies and executor logs.
pub fn llm_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join("llm")
}

impl RunLog {
    pub fn create(root: &Path, run_id: &str) -> Result<Self> {
        let dir = root.join(STATE_DIR).join("runs").join(run_id);
        fs::create_dir_all(&dir).with_context(|| format!("create run dir {}", dir.display()))?;
        debug!(run_id, dir = %dir.display(), "run log created");
        Ok(Self {
            run_id: run_id.to_string(),
            dir,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn transitions_path(&self) -> PathBuf {
        self.dir.join("transitions.jsonl")
    }

    pub fn final_state_path(&self) -> PathBuf {
        self.dir.join("final_state.json")
    }

    pub fn record_transition(&self, record: &TransitionRecord) -> Result<()> {
        let path = self.transitions_path();
        let mut line = serde_json::to_string(record).context("serialize transition")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", path.display()))
    }

    pub fn write_final_state(&self, state: &WorkflowState) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(state).context("serialize final state")?;
        buf.push('\n');
        write_atomic(&self.final_state_path(), &buf)
    }
}

pub fn load_transitions(path: &Path) -> Result<Vec<TransitionRecord>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).with_context(|| format!("parse {}", path.display())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FinalStatus;

    #[test]
    fn run_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::create(temp.path(), "run-1").expect("create");
        assert!(log.dir().ends_with(Path::new(".patchloop/runs/run-1")));
        assert!(log.transitions_path().ends_with("transitions.jsonl"));
        assert!(log.final_state_path().ends_with("final_state.json"));
        assert!(llm_dir(temp.path()).ends_with(Path::new(".patchloop/llm")));
    }

    #[test]
    fn transitions_append_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::create(temp.path(), "run-2").expect("create");
        let state = WorkflowState::new("req", 3);
        log.record_transition(&TransitionRecord::capture(1, NodeKind::Plan, &state))
            .expect("record");
        log.record_transition(&TransitionRecord::capture(2, NodeKind::Code, &state))
            .expect("record");

        let records = load_transitions(&log.transitions_path()).expect("load");
        let nodes: Vec<NodeKind> = records.iter().map(|r| r.node).collect();
        assert_eq!(nodes, vec![NodeKind::Plan, NodeKind::Code]);
    }

    #[test]
    fn final_state_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::create(temp.path(), "run-3").expect("create");
        let mut state = WorkflowState::new("req", 3);
        state.finish(FinalStatus::NoChanges);
        log.write_final_state(&state).expect("write");

        let raw = fs::read_to_string(log.final_state_path()).expect("read");
        let loaded: WorkflowState = serde_json::from_str(&raw).expect("parse");
        assert_eq!(loaded, state);
    }

    #[test]
    fn run_ids_have_prefix() {
        assert!(new_run_id().starts_with("run-"));
    }
}
