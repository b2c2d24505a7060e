//! Executor abstraction for agent invocation.
//!
//! The [`Executor`] trait decouples the LLM-backed collaborators from the
//! actual agent backend (by default `codex exec`). Tests use scripted
//! executors that write predetermined replies without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::process::{CommandOutput, RunLimits, run_command};

/// Parameters for an executor invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Working directory for the executor process.
    pub workdir: PathBuf,
    /// Prompt text to feed to the agent.
    pub prompt: String,
    /// Path where the agent must write its final message.
    pub output_path: PathBuf,
    /// Path to write executor stdout/stderr log.
    pub log_path: PathBuf,
    /// Maximum time to wait for the executor to complete.
    pub timeout: Duration,
    /// Truncate executor output logs beyond this many bytes.
    pub output_limit_bytes: usize,
    /// When set, stdout is copied here line by line while the agent runs.
    pub stream_path: Option<PathBuf>,
}

/// Abstraction over agent execution backends.
pub trait Executor {
    /// Run the agent with the given request. Must write output to `request.output_path`.
    fn exec(&self, request: &ExecRequest) -> Result<()>;
}

/// Executor that spawns the configured agent CLI.
///
/// The command gets `--output-last-message <path> -` appended and reads the
/// prompt from stdin, which matches `codex exec`.
pub struct CommandExecutor {
    command: Vec<String>,
}

impl CommandExecutor {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Executor for CommandExecutor {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs(), streaming = request.stream_path.is_some()))]
    fn exec(&self, request: &ExecRequest) -> Result<()> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("llm command is empty"))?;
        info!(program = %program, workdir = %request.workdir.display(), "starting agent");

        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("--output-last-message")
            .arg(&request.output_path)
            .arg("-")
            .current_dir(&request.workdir);

        let limits = RunLimits::new(request.timeout, request.output_limit_bytes)
            .with_stdin(request.prompt.as_bytes())
            .with_stream(request.stream_path.as_deref());
        let output = run_command(cmd, limits).with_context(|| format!("run {program}"))?;

        write_executor_log(&request.log_path, &output, request.output_limit_bytes)?;

        if output.timed_out {
            warn!(
                timeout_secs = request.timeout.as_secs(),
                "agent timed out"
            );
            return Err(anyhow!("{program} timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
            return Err(anyhow!(
                "{program} failed with status {:?}",
                output.status.code()
            ));
        }

        debug!("agent completed successfully");
        Ok(())
    }
}

/// Execute the agent and return its final message verbatim.
#[instrument(skip_all, fields(output_path = %request.output_path.display()))]
pub fn execute_and_load_text(executor: &dyn Executor, request: &ExecRequest) -> Result<String> {
    executor.exec(request)?;
    ensure_output_exists(&request.output_path)?;
    fs::read_to_string(&request.output_path)
        .with_context(|| format!("read agent output {}", request.output_path.display()))
}

fn ensure_output_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("missing executor output {}", path.display()));
    }
    Ok(())
}

fn write_executor_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create executor log dir {}", parent.display()))?;
    }
    let mut buf = output.combined_text("executor");
    if buf.len() > output_limit {
        let mut cut = output_limit;
        while !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        let dropped = buf.len() - cut;
        buf.truncate(cut);
        buf.push_str(&format!("\n[truncated {dropped} bytes]\n"));
    }
    fs::write(path, buf).with_context(|| format!("write executor log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeExecutor {
        reply: Option<&'static str>,
    }

    impl Executor for FakeExecutor {
        fn exec(&self, request: &ExecRequest) -> Result<()> {
            if let Some(reply) = self.reply {
                fs::write(&request.output_path, reply)?;
            }
            Ok(())
        }
    }

    fn request(root: &Path) -> ExecRequest {
        ExecRequest {
            workdir: root.to_path_buf(),
            prompt: "prompt".to_string(),
            output_path: root.join("output.md"),
            log_path: root.join("executor.log"),
            timeout: Duration::from_secs(5),
            output_limit_bytes: 1000,
            stream_path: None,
        }
    }

    /// Verifies the final message is returned as written by the agent.
    #[test]
    fn execute_and_load_text_reads_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fake = FakeExecutor {
            reply: Some("```json\n{}\n```"),
        };
        let text = execute_and_load_text(&fake, &request(temp.path())).expect("load");
        assert_eq!(text, "```json\n{}\n```");
    }

    /// Verifies a missing output file is an error rather than an empty reply.
    #[test]
    fn execute_and_load_text_errors_on_missing_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fake = FakeExecutor { reply: None };
        let err = execute_and_load_text(&fake, &request(temp.path())).unwrap_err();
        assert!(err.to_string().contains("missing executor output"));
    }

    /// The command executor appends the output flag and feeds the prompt on stdin.
    #[cfg(unix)]
    #[test]
    fn command_executor_runs_configured_program() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = r#"out=""; while [ $# -gt 0 ]; do if [ "$1" = "--output-last-message" ]; then out="$2"; shift; fi; shift; done; cat > "$out""#;
        let executor = CommandExecutor::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "agent".to_string(),
        ]);
        let text = execute_and_load_text(&executor, &request(temp.path())).expect("run");
        assert_eq!(text, "prompt");
        assert!(temp.path().join("executor.log").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn command_executor_reports_failure_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let executor = CommandExecutor::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "exit 3".to_string(),
        ]);
        let err = execute_and_load_text(&executor, &request(temp.path())).unwrap_err();
        assert!(err.to_string().contains("failed with status"));
    }
}
