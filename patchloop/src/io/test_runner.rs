//! Test command runner.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::types::TestResults;
use crate::io::process::{RunLimits, run_command};

pub trait TestRunner {
    fn run_tests(&self, command: &[String]) -> Result<TestResults>;
}

/// Runs an allow-listed test command in the repository.
pub struct ShellTestRunner {
    pub workdir: PathBuf,
    pub allowed_commands: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    /// Full output of the last run is written here when set.
    pub log_path: Option<PathBuf>,
}

impl ShellTestRunner {
    fn is_allowed(&self, program: &str) -> bool {
        let name = Path::new(program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.to_string());
        self.allowed_commands.iter().any(|allowed| *allowed == name)
    }
}

impl TestRunner for ShellTestRunner {
    #[instrument(skip_all, fields(command = %command.join(" ")))]
    fn run_tests(&self, command: &[String]) -> Result<TestResults> {
        let Some((program, args)) = command.split_first() else {
            return Ok(TestResults {
                success: false,
                output: "No test command configured".to_string(),
                command: Vec::new(),
            });
        };
        if !self.is_allowed(program) {
            warn!(program = %program, "test command not allowed");
            return Ok(TestResults {
                success: false,
                output: format!(
                    "Command '{program}' is not allowed. Allowed commands: {}",
                    self.allowed_commands.join(", ")
                ),
                command: command.to_vec(),
            });
        }

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        let output = match run_command(cmd, RunLimits::new(self.timeout, self.output_limit_bytes)) {
            Ok(output) => output,
            Err(err) => {
                // A missing test binary is a failed test run, not a crashed orchestrator.
                warn!(err = %format!("{err:#}"), "test command could not run");
                return Ok(TestResults {
                    success: false,
                    output: format!("Failed to run {}: {err:#}", command.join(" ")),
                    command: command.to_vec(),
                });
            }
        };

        let text = output.combined_text("tests");
        if let Some(path) = &self.log_path {
            write_test_log(path, &text)?;
        }
        info!(success = output.success(), timed_out = output.timed_out, "tests finished");
        Ok(TestResults {
            success: output.success(),
            output: text,
            command: command.to_vec(),
        })
    }
}

fn write_test_log(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create test log dir {}", parent.display()))?;
    }
    fs::write(path, text).with_context(|| format!("write test log {}", path.display()))
}
