//! Append-only memory of past plans, code, fixes and review decisions.
//!
//! Records are stored as JSON lines. Retrieval scores records by keyword
//! overlap with the query; nothing here needs embeddings.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::text::truncate_chars;

const SUMMARY_LIMIT: usize = 300;
const MIN_KEYWORD_LEN: usize = 3;

/// Memory capability. Callers treat every failure as non-fatal.
pub trait MemoryStore {
    /// Rendered snippets of the records most relevant to `query`.
    fn relevant_context(&self, query: &str, max_results: usize) -> Result<String>;
    fn store(&self, record: MemoryRecord) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemoryRecord {
    Plan {
        request: String,
        understanding: String,
        steps: Vec<String>,
    },
    Code {
        file_path: String,
        task: String,
        code: String,
    },
    ErrorPattern {
        error: String,
        fix: String,
    },
    Decision {
        topic: String,
        decision: String,
        rationale: String,
    },
}

impl MemoryRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            MemoryRecord::Plan { .. } => "plan",
            MemoryRecord::Code { .. } => "code",
            MemoryRecord::ErrorPattern { .. } => "error_pattern",
            MemoryRecord::Decision { .. } => "decision",
        }
    }

    /// Text used both for scoring and for rendering.
    pub fn summary(&self) -> String {
        match self {
            MemoryRecord::Plan {
                request,
                understanding,
                steps,
            } => format!("{request}: {understanding} ({})", steps.join("; ")),
            MemoryRecord::Code {
                file_path, task, ..
            } => format!("{file_path}: {task}"),
            MemoryRecord::ErrorPattern { error, fix } => format!("{error} -> {fix}"),
            MemoryRecord::Decision {
                topic,
                decision,
                rationale,
            } => format!("{topic}: {decision} ({rationale})"),
        }
    }
}

fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|word| word.chars().count() >= MIN_KEYWORD_LEN)
        .map(str::to_lowercase)
        .collect()
}

/// Pick up to `max_results` records sharing the most keywords with `query`.
///
/// Ties go to the more recent record.
pub fn rank_records<'a>(
    records: &'a [MemoryRecord],
    query: &str,
    max_results: usize,
) -> Vec<&'a MemoryRecord> {
    let wanted = keywords(query);
    let mut scored: Vec<(usize, usize, &MemoryRecord)> = records
        .iter()
        .enumerate()
        .filter_map(|(idx, record)| {
            let score = keywords(&record.summary()).intersection(&wanted).count();
            (score > 0).then_some((score, idx, record))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
    scored
        .into_iter()
        .take(max_results)
        .map(|(_, _, record)| record)
        .collect()
}

pub fn render_records(records: &[&MemoryRecord]) -> String {
    records
        .iter()
        .map(|record| {
            format!(
                "- [{}] {}",
                record.kind(),
                truncate_chars(&record.summary(), SUMMARY_LIMIT)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// JSONL-backed [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct FileMemoryStore {
    path: PathBuf,
}

impl FileMemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<MemoryRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read memory {}", self.path.display()))?;
        let mut records = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(err) => debug!(line = lineno + 1, err = %err, "skipping malformed memory line"),
            }
        }
        Ok(records)
    }
}

impl MemoryStore for FileMemoryStore {
    #[instrument(skip_all, fields(max_results))]
    fn relevant_context(&self, query: &str, max_results: usize) -> Result<String> {
        let records = self.load()?;
        let ranked = rank_records(&records, query, max_results);
        debug!(total = records.len(), matched = ranked.len(), "memory lookup");
        Ok(render_records(&ranked))
    }

    fn store(&self, record: MemoryRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create memory dir {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(&record).context("serialize memory record")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open memory {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append memory {}", self.path.display()))
    }
}

/// Memory used when persistence is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMemoryStore;

impl MemoryStore for NoopMemoryStore {
    fn relevant_context(&self, _query: &str, _max_results: usize) -> Result<String> {
        Ok(String::new())
    }

    fn store(&self, _record: MemoryRecord) -> Result<()> {
        Ok(())
    }
}
