//! Configuration stored under `.patchloop/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::merge::MergeThresholds;

pub const STATE_DIR: &str = ".patchloop";
pub const CONFIG_FILE: &str = "config.toml";

/// Default config location inside a repository.
pub fn default_config_path(repo: &Path) -> PathBuf {
    repo.join(STATE_DIR).join(CONFIG_FILE)
}

/// Orchestrator configuration (TOML).
///
/// Every section defaults independently, so a file only needs the keys it
/// changes. CLI flags override the top-level run settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub max_iterations: u32,
    pub enable_auto_fix: bool,
    pub enable_reasoning: bool,
    /// Environment variables that must be set before a run starts.
    pub required_env: Vec<String>,

    pub llm: LlmConfig,
    pub tests: TestsConfig,
    pub github: GithubConfig,
    pub ci: CiConfig,
    pub reasoning: ReasoningConfig,
    pub context: ContextConfig,
    pub memory: MemoryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            enable_auto_fix: true,
            enable_reasoning: false,
            required_env: vec!["GITHUB_TOKEN".to_string()],
            llm: LlmConfig::default(),
            tests: TestsConfig::default(),
            github: GithubConfig::default(),
            ci: CiConfig::default(),
            reasoning: ReasoningConfig::default(),
            context: ContextConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LlmConfig {
    /// Agent CLI invocation; the prompt is written to its stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            command: ["codex", "exec", "--skip-git-repo-check", "--sandbox", "read-only"]
                .into_iter()
                .map(String::from)
                .collect(),
            timeout_secs: 600,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestsConfig {
    pub command: Vec<String>,
    /// Programs the test runner may launch.
    pub allowed_commands: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            command: vec!["pytest".to_string()],
            allowed_commands: [
                "python", "pytest", "npm", "yarn", "pip", "git", "make", "docker", "black",
                "flake8", "mypy", "cargo", "just",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            timeout_secs: 30 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GithubConfig {
    pub remote: String,
    pub base_branch: String,
    pub branch_prefix: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            base_branch: "main".to_string(),
            branch_prefix: "patchloop".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CiConfig {
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            poll_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReasoningConfig {
    pub replace_confidence: f64,
    pub merge_confidence: f64,
    /// Minimum analysis confidence before Fix uses the recommended fix.
    pub debug_confidence: f64,
    /// Minimum accumulated errors before Fix asks for a root-cause analysis.
    pub debug_min_errors: usize,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            replace_confidence: 0.7,
            merge_confidence: 0.5,
            debug_confidence: 0.6,
            debug_min_errors: 3,
        }
    }
}

impl ReasoningConfig {
    pub fn merge_thresholds(&self) -> MergeThresholds {
        MergeThresholds {
            replace: self.replace_confidence,
            merge: self.merge_confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    pub max_files: usize,
    pub max_chars_per_file: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_files: 10,
            max_chars_per_file: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfig {
    pub enabled: bool,
    /// Relative paths resolve against the repository root.
    pub path: PathBuf,
    pub max_results: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(STATE_DIR).join("memory.jsonl"),
            max_results: 5,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        validate_command("llm.command", &self.llm.command)?;
        validate_command("tests.command", &self.tests.command)?;
        if self.llm.timeout_secs == 0 {
            return Err(anyhow!("llm.timeout_secs must be > 0"));
        }
        if self.llm.output_limit_bytes == 0 {
            return Err(anyhow!("llm.output_limit_bytes must be > 0"));
        }
        if self.tests.timeout_secs == 0 {
            return Err(anyhow!("tests.timeout_secs must be > 0"));
        }
        if self.tests.output_limit_bytes == 0 {
            return Err(anyhow!("tests.output_limit_bytes must be > 0"));
        }
        if self.ci.timeout_secs == 0 {
            return Err(anyhow!("ci.timeout_secs must be > 0"));
        }
        if self.ci.poll_interval_secs == 0 {
            return Err(anyhow!("ci.poll_interval_secs must be > 0"));
        }
        if self.github.remote.trim().is_empty() || self.github.branch_prefix.trim().is_empty() {
            return Err(anyhow!("github.remote and github.branch_prefix must be set"));
        }
        for (name, value) in [
            ("reasoning.replace_confidence", self.reasoning.replace_confidence),
            ("reasoning.merge_confidence", self.reasoning.merge_confidence),
            ("reasoning.debug_confidence", self.reasoning.debug_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{name} must be within [0, 1], got {value}"));
            }
        }
        if self.reasoning.merge_confidence > self.reasoning.replace_confidence {
            return Err(anyhow!(
                "reasoning.merge_confidence must not exceed reasoning.replace_confidence"
            ));
        }
        if self.context.max_chars_per_file == 0 {
            return Err(anyhow!("context.max_chars_per_file must be > 0"));
        }
        Ok(())
    }
}

fn validate_command(name: &str, command: &[String]) -> Result<()> {
    match command.first() {
        Some(program) if !program.trim().is_empty() => Ok(()),
        _ => Err(anyhow!("{name} must be a non-empty array")),
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AppConfig::default()`.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let cfg = AppConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AppConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` to a sibling temp file, then rename it over `path`.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?;
    let tmp_path = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Names from `required` that `lookup` reports as unset or empty.
pub fn missing_env<F>(required: &[String], lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    required
        .iter()
        .filter(|name| lookup(name.as_str()).is_none_or(|value| value.trim().is_empty()))
        .cloned()
        .collect()
}
