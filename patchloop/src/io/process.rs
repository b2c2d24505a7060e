//! Child processes with timeouts and bounded output.
//!
//! Both the LLM agent CLI and the test command can run for a long time and
//! print a lot, so every child is drained on reader threads while we wait with
//! a deadline. Bytes beyond the limit are discarded but still read to keep the
//! pipes flowing.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

type Tee = Arc<Mutex<BufWriter<File>>>;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// stdout followed by stderr, with truncation and timeout notices.
    pub fn combined_text(&self, label: &str) -> String {
        let mut buf = String::from_utf8_lossy(&self.stdout).into_owned();
        if self.stdout_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        if !self.stderr.is_empty() {
            if !buf.is_empty() && !buf.ends_with('\n') {
                buf.push('\n');
            }
            buf.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        if self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        if self.timed_out {
            buf.push_str(&format!("\n[{label} timed out]\n"));
        }
        buf
    }
}

/// Limits and plumbing for one child process.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits<'a> {
    pub stdin: Option<&'a [u8]>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    /// When set, stdout lines are also written (and flushed) here as they arrive.
    pub stream_path: Option<&'a Path>,
}

impl<'a> RunLimits<'a> {
    pub fn new(timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            stdin: None,
            timeout,
            output_limit_bytes,
            stream_path: None,
        }
    }

    pub fn with_stdin(mut self, stdin: &'a [u8]) -> Self {
        self.stdin = Some(stdin);
        self
    }

    pub fn with_stream(mut self, path: Option<&'a Path>) -> Self {
        self.stream_path = path;
        self
    }
}

/// Run `cmd` under `limits`. A timeout kills the child and is reported in the output, not as an error.
#[instrument(skip_all, fields(
    timeout_secs = limits.timeout.as_secs(),
    output_limit_bytes = limits.output_limit_bytes,
    streaming = limits.stream_path.is_some()
))]
pub fn run_command(mut cmd: Command, limits: RunLimits<'_>) -> Result<CommandOutput> {
    if limits.stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let tee = match limits.stream_path {
        Some(path) => Some(open_tee(path)?),
        None => None,
    };

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(err = %err, "failed to spawn command");
            return Err(err).context("spawn command");
        }
    };

    let stdin_handle = match limits.stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            Some(thread::spawn(move || -> Result<()> {
                child_stdin.write_all(&input).context("write stdin")
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let limit = limits.output_limit_bytes;
    let stdout_handle = thread::spawn(move || read_lines_limited(stdout, limit, tee));
    let stderr_handle = thread::spawn(move || read_lines_limited(stderr, limit, None));

    let mut timed_out = false;
    let status = match child
        .wait_timeout(limits.timeout)
        .context("wait for command")?
    {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = limits.timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    if let Some(handle) = stdin_handle {
        match handle.join() {
            Ok(Err(err)) if !timed_out => {
                // The child may exit without reading all of its input.
                debug!(err = %format!("{err:#}"), "stdin not fully consumed");
            }
            Ok(_) => {}
            Err(_) => return Err(anyhow!("stdin writer thread panicked")),
        }
    }

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn open_tee(path: &Path) -> Result<Tee> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create stream dir {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("create stream file {}", path.display()))?;
    Ok(Arc::new(Mutex::new(BufWriter::new(file))))
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    tee: Option<Tee>,
) -> Result<(Vec<u8>, usize)> {
    let mut reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).context("read output")?;
        if n == 0 {
            break;
        }

        if let Some(tee) = &tee
            && let Ok(mut writer) = tee.lock()
        {
            if let Err(err) = writer.write_all(&line) {
                warn!(err = %err, "failed to write to stream file");
            } else if let Err(err) = writer.flush() {
                warn!(err = %err, "failed to flush stream file");
            }
        }

        let keep = n.min(limit.saturating_sub(collected.len()));
        collected.extend_from_slice(&line[..keep]);
        truncated += n - keep;
    }

    Ok((collected, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_both_streams() {
        let output = run_command(
            sh("echo out; echo err >&2"),
            RunLimits::new(Duration::from_secs(10), 1000),
        )
        .expect("run");
        assert!(output.success());
        assert_eq!(output.combined_text("sh"), "out\nerr\n");
    }

    #[test]
    fn feeds_stdin_and_tees_stdout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stream = temp.path().join("logs/stream.log");
        let output = run_command(
            sh("cat"),
            RunLimits::new(Duration::from_secs(10), 1000)
                .with_stdin(b"hello\n")
                .with_stream(Some(&stream)),
        )
        .expect("run");
        assert_eq!(output.stdout, b"hello\n");
        assert_eq!(fs::read_to_string(&stream).expect("stream"), "hello\n");
    }

    #[test]
    fn bounds_captured_output() {
        let output = run_command(
            sh("printf 'abcdefghij'"),
            RunLimits::new(Duration::from_secs(10), 4),
        )
        .expect("run");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 6);
    }

    #[test]
    fn timeout_kills_child() {
        let output = run_command(
            sh("sleep 5"),
            RunLimits::new(Duration::from_millis(100), 1000),
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(!output.success());
    }
}
